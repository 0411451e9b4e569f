//! Recipe expansion round-trip (spec §8): a recipe expanded into
//! instantiated Wants, serialized, and reloaded must produce an identical
//! graph — same ids, owner references, namespaced labels, and resolved
//! params.

use want_recipes::{expand_recipe, parse_recipe_str};
use want_types::{DynamicMap, InstantiatedWant};

const RECIPE_YAML: &str = r#"
recipe:
  metadata:
    name: order-pipeline
    description: queue a producer behind a consumer
  parameters:
    queue_size: 20
  wants:
    - type: producer
      labels:
        role: producer
      params:
        size: queue_size
    - type: consumer
      labels:
        role: consumer
      using:
        - role: producer
      params:
        batch: 5
  result:
    - want_name: "{{.targetName}}-queue"
      stat_name: depth
"#;

#[test]
fn recipe_expansion_round_trips_through_serialization() {
    let recipe = parse_recipe_str(RECIPE_YAML).unwrap();
    let expanded = expand_recipe(&recipe, "order-1", &DynamicMap::new()).unwrap();
    assert_eq!(expanded.len(), 2);

    let serialized = serde_json::to_string(&expanded).unwrap();
    let reloaded: Vec<InstantiatedWant> = serde_json::from_str(&serialized).unwrap();

    assert_eq!(expanded.len(), reloaded.len());
    for (original, loaded) in expanded.iter().zip(reloaded.iter()) {
        assert_eq!(original.id, loaded.id);
        assert_eq!(original.name, loaded.name);
        assert_eq!(original.want_type, loaded.want_type);
        assert_eq!(original.labels, loaded.labels);
        assert_eq!(original.owner_references.len(), loaded.owner_references.len());
        assert_eq!(original.owner_references[0].name, loaded.owner_references[0].name);
        assert_eq!(original.owner_references[0].controller, loaded.owner_references[0].controller);
        assert_eq!(original.params, loaded.params);
        assert_eq!(original.using, loaded.using);
    }

    let producer = &expanded[0];
    assert_eq!(producer.name, "order-1-producer-1");
    assert_eq!(producer.labels.get("role"), Some(&"order-1:producer".to_string()));
    assert_eq!(producer.params.get("size"), Some(&want_types::Dynamic::Int(20)));

    let consumer = &expanded[1];
    assert_eq!(consumer.using[0].get("role"), Some(&"order-1:producer".to_string()));
}

#[test]
fn legacy_result_spec_selector_survives_parsing() {
    let recipe = parse_recipe_str(RECIPE_YAML).unwrap();
    let result = recipe.result.expect("recipe declares a result block");
    let specs = result.specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].want_name, "{{.targetName}}-queue");
    assert_eq!(specs[0].stat_name, "depth");
}
