//! Recipe expansion (spec §4.G): materialize a parameterized recipe into a
//! concrete graph of owned, prefix-namespaced child Wants.

use std::collections::{BTreeMap, HashMap};

use want_types::{Dynamic, DynamicMap, InstantiatedWant, OwnerReference, Recipe, Selector};

use crate::error::Result;

/// Merge the recipe's own parameter defaults with caller overrides;
/// overrides win on key collision.
pub fn merged_parameters(recipe: &Recipe, overrides: &DynamicMap) -> DynamicMap {
    let mut merged = recipe.parameters.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// For every label value (not key), prefix with `{prefix}:` so a selector
/// only matches labels inside the same recipe instance (spec §4.G
/// `namespaceWantConnections`).
pub fn namespace_label_map(labels: &BTreeMap<String, String>, prefix: &str) -> BTreeMap<String, String> {
    labels.iter().map(|(k, v)| (k.clone(), format!("{prefix}:{v}"))).collect()
}

/// Same namespacing applied to every value in every `using` selector.
pub fn namespace_selectors(selectors: &[Selector], prefix: &str) -> Vec<Selector> {
    selectors
        .iter()
        .map(|sel| sel.iter().map(|(k, v)| (k.clone(), format!("{prefix}:{v}"))).collect())
        .collect()
}

/// A want param whose value is a string naming a key in the merged
/// parameter map is replaced by that value; anything else, including a
/// string that names no such key, is left as written in the recipe.
fn substitute_params(params: &DynamicMap, merged: &DynamicMap) -> DynamicMap {
    params
        .iter()
        .map(|(k, v)| {
            let resolved = match v {
                Dynamic::String(s) => merged.get(s).cloned().unwrap_or_else(|| v.clone()),
                other => other.clone(),
            };
            (k.clone(), resolved)
        })
        .collect()
}

/// Expand every `RecipeWant` into an `InstantiatedWant` owned by `prefix`
/// (the recipe instance's own name). The resulting owner reference matches
/// the legacy `mywant/v1` shape exactly: one controller reference back to
/// `prefix`.
///
/// Refuses the whole batch (spec §7: "validation failures are reported
/// synchronously and refused") if any instantiated want ends up with more
/// than one controller owner reference, or if adding the batch to an empty
/// graph would close an owner-reference cycle — the latter only fires when
/// a want's default or explicit name collides with `prefix` itself, since
/// every other child's sole owner is `prefix`, which isn't among the wants
/// being added.
pub fn expand_recipe(recipe: &Recipe, prefix: &str, overrides: &DynamicMap) -> Result<Vec<InstantiatedWant>> {
    let merged = merged_parameters(recipe, overrides);
    let expanded: Vec<InstantiatedWant> = recipe
        .wants
        .iter()
        .enumerate()
        .map(|(index, rw)| {
            let want_type = rw.resolved_type().unwrap_or("want").to_string();
            let name = rw
                .name
                .clone()
                .unwrap_or_else(|| format!("{prefix}-{want_type}-{}", index + 1));
            let id = rw.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            InstantiatedWant {
                id,
                name,
                want_type,
                labels: namespace_label_map(&rw.labels, prefix),
                owner_references: vec![OwnerReference::controller("Want", prefix)],
                params: substitute_params(&rw.params, &merged),
                using: namespace_selectors(&rw.using, prefix),
                requires: rw.requires.clone(),
                when: rw.when.clone(),
            }
        })
        .collect();

    for want in &expanded {
        want_types::validate_single_controller(&want.owner_references)?;
    }
    validate_acyclic(&HashMap::new(), &expanded)?;

    Ok(expanded)
}

/// Check that adding `new_wants` to a graph whose existing controller
/// edges are already known (`existing_edges`, keyed by want name) doesn't
/// close a cycle. A single recipe's own expansion can never cycle on its
/// own — every child wants the same prefix want as its sole controller —
/// but composed/nested recipes can, so callers assembling a larger graph
/// should run this once per batch before submitting it.
pub fn validate_acyclic(existing_edges: &HashMap<String, String>, new_wants: &[InstantiatedWant]) -> Result<()> {
    let mut edges = existing_edges.clone();
    for want in new_wants {
        if let Some(owner) = want.owner_references.iter().find(|o| o.controller) {
            edges.insert(want.name.clone(), owner.name.clone());
        }
    }
    want_types::validate_no_owner_cycles(&edges)?;
    Ok(())
}
