pub mod dynamic;
pub mod error;
pub mod graph;
pub mod model;
pub mod recipe;

pub use dynamic::*;
pub use error::*;
pub use graph::*;
pub use model::*;
pub use recipe::*;
