//! Recipe file loading (spec §4.G): parse, structurally validate.

use want_types::Recipe;

use crate::error::{RecipeError, Result};

/// The YAML root: everything lives under a `recipe:` key (spec §6 "Recipe
/// file format").
#[derive(Debug, serde::Deserialize)]
struct RecipeFile {
    recipe: Recipe,
}

pub fn parse_recipe_str(yaml: &str) -> Result<Recipe> {
    let file: RecipeFile = serde_yaml::from_str(yaml)?;
    validate(&file.recipe)?;
    Ok(file.recipe)
}

pub fn load_recipe_file(path: impl AsRef<std::path::Path>) -> Result<Recipe> {
    let raw = std::fs::read_to_string(path)?;
    parse_recipe_str(&raw)
}

/// Structural validation (spec §4.G/§6): a want must declare either
/// top-level `type` or `metadata.type`; every result spec needs
/// `want_name` and `stat_name`.
fn validate(recipe: &Recipe) -> Result<()> {
    if recipe.metadata.name.trim().is_empty() {
        return Err(RecipeError::validation("recipe.metadata.name", "must not be empty"));
    }
    if recipe.wants.is_empty() {
        return Err(RecipeError::validation("recipe.wants", "must contain at least one want"));
    }
    for (i, want) in recipe.wants.iter().enumerate() {
        if want.resolved_type().is_none() {
            return Err(RecipeError::validation(
                format!("recipe.wants[{i}]"),
                "must declare either top-level `type` or `metadata.type`",
            ));
        }
    }
    if let Some(result) = &recipe.result {
        for (i, spec) in result.specs().into_iter().enumerate() {
            if spec.want_name.trim().is_empty() {
                return Err(RecipeError::validation(format!("recipe.result[{i}].want_name"), "must not be empty"));
            }
            if spec.stat_name.trim().is_empty() {
                return Err(RecipeError::validation(format!("recipe.result[{i}].stat_name"), "must not be empty"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_want_with_no_type() {
        let yaml = r#"
recipe:
  metadata:
    name: broken
  wants:
    - params: {}
"#;
        let err = parse_recipe_str(yaml).unwrap_err();
        assert!(matches!(err, RecipeError::Validation { .. }));
    }

    #[test]
    fn accepts_metadata_type_in_place_of_top_level_type() {
        let yaml = r#"
recipe:
  metadata:
    name: sample
  wants:
    - metadata_type: producer
      params:
        size: 5
"#;
        let recipe = parse_recipe_str(yaml).unwrap();
        assert_eq!(recipe.wants[0].resolved_type(), Some("producer"));
    }

    #[test]
    fn rejects_result_spec_missing_stat_name() {
        let yaml = r#"
recipe:
  metadata:
    name: sample
  wants:
    - type: producer
  result:
    - want_name: queue
      stat_name: ""
"#;
        let err = parse_recipe_str(yaml).unwrap_err();
        assert!(matches!(err, RecipeError::Validation { .. }));
    }
}
