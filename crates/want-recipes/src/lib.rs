//! Recipe loader and Want-graph expansion (spec §4.G): parse and validate a
//! recipe file, expand it into owned, prefix-namespaced child Wants, and
//! resolve the legacy flat/structured result block against a live graph.

pub mod error;
pub mod expand;
pub mod loader;
pub mod result;

pub use error::{RecipeError, Result};
pub use expand::{expand_recipe, merged_parameters, namespace_label_map, namespace_selectors, validate_acyclic};
pub use loader::{load_recipe_file, parse_recipe_str};
pub use result::{resolve_all, resolve_legacy_result};
