//! Recipe data model (spec §3, §4.G).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dynamic::{Dynamic, DynamicMap};
use crate::model::{OwnerReference, Selector, WhenSpec};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "type", default)]
    pub want_type: Option<String>,
    #[serde(default)]
    pub custom_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// One Want template inside a recipe's `wants[]` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeWant {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub want_type: Option<String>,
    #[serde(default)]
    pub metadata_type: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub params: DynamicMap,
    #[serde(default)]
    pub using: Vec<Selector>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub when: Option<WhenSpec>,
}

impl RecipeWant {
    /// Either top-level `type` or `metadata.type` must be present — the
    /// recipe loader's structural validation rejects a want with neither.
    pub fn resolved_type(&self) -> Option<&str> {
        self.want_type
            .as_deref()
            .or(self.metadata_type.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeResultSpec {
    pub want_name: String,
    pub stat_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipeResult {
    Flat(Vec<RecipeResultSpec>),
    Structured {
        primary: Vec<RecipeResultSpec>,
        metrics: Vec<RecipeResultSpec>,
    },
}

impl RecipeResult {
    pub fn specs(&self) -> Vec<&RecipeResultSpec> {
        match self {
            RecipeResult::Flat(v) => v.iter().collect(),
            RecipeResult::Structured { primary, metrics } => {
                primary.iter().chain(metrics.iter()).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub metadata: RecipeMetadata,
    #[serde(default)]
    pub parameters: DynamicMap,
    pub wants: Vec<RecipeWant>,
    #[serde(default)]
    pub result: Option<RecipeResult>,
    #[serde(default)]
    pub example: Option<Dynamic>,
}

/// A synthesized child Want produced by recipe expansion, ready to be
/// submitted into the engine (spec §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstantiatedWant {
    pub id: String,
    pub name: String,
    pub want_type: String,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
    pub params: DynamicMap,
    pub using: Vec<Selector>,
    pub requires: Vec<String>,
    pub when: Option<WhenSpec>,
}
