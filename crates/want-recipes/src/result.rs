//! Legacy recipe result extraction (spec §4.G `GetLegacyRecipeResult`).

use std::sync::Arc;

use want_core::Want;
use want_types::{Dynamic, RecipeResultSpec};

/// Resolve one result spec against a live Want graph: find the want whose
/// name matches the selector (with the literal `{{.targetName}}-queue`
/// substring replaced by `{targetName}-queue`), or failing that whose type
/// or any label key/value equals the selector, then read the requested stat
/// from its state.
pub async fn resolve_legacy_result(wants: &[Arc<Want>], spec: &RecipeResultSpec, target_name: &str) -> Option<Dynamic> {
    let selector = spec.want_name.replace("{{.targetName}}-queue", &format!("{target_name}-queue"));

    for want in wants {
        if matches_selector(want, &selector).await {
            return want.get_state(&spec.stat_name).await;
        }
    }
    None
}

async fn matches_selector(want: &Arc<Want>, selector: &str) -> bool {
    if want.name() == selector {
        return true;
    }
    if want.identity().want_type == selector {
        return true;
    }
    let metadata = want.metadata().await;
    metadata.labels.iter().any(|(k, v)| k == selector || v == selector)
}

/// Resolve every spec named by a recipe's result block, in order.
pub async fn resolve_all(wants: &[Arc<Want>], specs: &[&RecipeResultSpec], target_name: &str) -> Vec<(String, Option<Dynamic>)> {
    let mut resolved = Vec::with_capacity(specs.len());
    for spec in specs {
        let value = resolve_legacy_result(wants, spec, target_name).await;
        resolved.push((spec.stat_name.clone(), value));
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use want_types::{WantIdentity, WantMetadata, WantSpec};

    fn identity(name: &str, want_type: &str) -> WantIdentity {
        WantIdentity {
            id: format!("id-{name}"),
            name: name.to_string(),
            want_type: want_type.to_string(),
        }
    }

    fn spec(want_name: &str, stat_name: &str) -> RecipeResultSpec {
        RecipeResultSpec {
            want_name: want_name.to_string(),
            stat_name: stat_name.to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn resolves_by_exact_name() {
        let want = Want::new(identity("pipe-1-queue", "queue"), WantMetadata::default(), WantSpec::default());
        want.store_state("count", Dynamic::Int(5)).await;
        let wants = vec![want];

        let value = resolve_legacy_result(&wants, &spec("pipe-1-queue", "count"), "pipe-1").await;
        assert_eq!(value, Some(Dynamic::Int(5)));
    }

    #[tokio::test]
    async fn resolves_templated_target_name_placeholder() {
        let want = Want::new(identity("order-queue", "queue"), WantMetadata::default(), WantSpec::default());
        want.store_state("depth", Dynamic::Int(3)).await;
        let wants = vec![want];

        let value = resolve_legacy_result(&wants, &spec("{{.targetName}}-queue", "depth"), "order").await;
        assert_eq!(value, Some(Dynamic::Int(3)));
    }

    #[tokio::test]
    async fn falls_back_to_type_or_label_match() {
        let mut metadata = WantMetadata::default();
        metadata.labels.insert("role".to_string(), "aggregator".to_string());
        let want = Want::new(identity("anything", "aggregator"), metadata, WantSpec::default());
        want.store_state("total", Dynamic::Int(42)).await;
        let wants = vec![want];

        let value = resolve_legacy_result(&wants, &spec("aggregator", "total"), "irrelevant").await;
        assert_eq!(value, Some(Dynamic::Int(42)));
    }

    #[tokio::test]
    async fn no_match_resolves_to_none() {
        let want = Want::new(identity("w", "queue"), WantMetadata::default(), WantSpec::default());
        let wants = vec![want];
        let value = resolve_legacy_result(&wants, &spec("missing", "count"), "x").await;
        assert!(value.is_none());
    }
}
