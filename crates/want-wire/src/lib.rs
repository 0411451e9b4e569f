pub mod http;
pub mod rpc;

pub use http::*;
