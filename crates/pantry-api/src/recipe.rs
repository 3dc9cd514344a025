use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ValidationFault;
use crate::uri::{AtUri, EntityKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Ingredient {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            amount: None,
            unit: None,
        }
    }

    pub fn with_amount(mut self, amount: f64, unit: impl Into<String>) -> Self {
        self.amount = Some(amount);
        self.unit = Some(unit.into());
        self
    }
}

/// A preparation step. Display order is `order`, not position in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub text: String,
    pub order: i64,
}

/// Present iff the recipe is a copy of another account's recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkMetadata {
    pub original_recipe_uri: AtUri,
    pub original_author_did: String,
    pub forked_at: DateTime<Utc>,
}

/// Recipe body as it is stored in the remote repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeRecord {
    pub title: String,
    pub servings: u32,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Non-owning references to other recipes.
    #[serde(default)]
    pub sub_recipes: BTreeSet<AtUri>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork_metadata: Option<ForkMetadata>,
}

impl RecipeRecord {
    pub fn new(title: impl Into<String>, servings: u32) -> Self {
        Self {
            title: title.into(),
            servings,
            ingredients: Vec::new(),
            steps: Vec::new(),
            sub_recipes: BTreeSet::new(),
            fork_metadata: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationFault> {
        if self.title.trim().is_empty() {
            return Err(ValidationFault::field("title", "must not be empty"));
        }
        if self.servings == 0 {
            return Err(ValidationFault::field("servings", "must be a positive integer"));
        }
        for sub in &self.sub_recipes {
            sub.expect_kind(EntityKind::Recipe)?;
        }
        if let Some(fork) = &self.fork_metadata {
            fork.original_recipe_uri.expect_kind(EntityKind::Recipe)?;
            if !fork.original_author_did.starts_with("did:") {
                return Err(ValidationFault::field(
                    "forkMetadata.originalAuthorDid",
                    "must be a did",
                ));
            }
        }
        Ok(())
    }

    pub fn is_fork(&self) -> bool {
        self.fork_metadata.is_some()
    }
}

/// A cached recipe: the remote body plus cache-only bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub uri: AtUri,
    #[serde(flatten)]
    pub record: RecipeRecord,
    /// Remote content hash; absent until the first remote fetch or confirmed write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub indexed_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub pending_sync: bool,
}

impl Recipe {
    /// A recipe written by a local user action, not yet confirmed remotely.
    pub fn local(uri: AtUri, record: RecipeRecord, now: DateTime<Utc>) -> Self {
        Self {
            uri,
            record,
            cid: None,
            indexed_at: now,
            last_modified: now,
            pending_sync: true,
        }
    }

    /// A recipe as fetched from (or announced by) the remote store.
    pub fn remote(uri: AtUri, record: RecipeRecord, cid: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            uri,
            record,
            cid,
            indexed_at: now,
            last_modified: now,
            pending_sync: false,
        }
    }

    pub fn is_fork(&self) -> bool {
        self.record.is_fork()
    }

    /// Steps in display order.
    pub fn sorted_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.record.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Equality over the user-visible fields (ignores cache bookkeeping).
    pub fn same_content(&self, other: &Recipe) -> bool {
        self.uri == other.uri && self.record == other.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(key: &str) -> AtUri {
        AtUri::parse(&format!("at://did:plc:alice/app.pantry.recipe/{key}")).unwrap()
    }

    #[test]
    fn test_steps_sort_by_order_field() {
        let mut record = RecipeRecord::new("Bread", 2);
        record.steps = vec![
            Step { id: "c".into(), text: "Bake".into(), order: 3 },
            Step { id: "a".into(), text: "Mix".into(), order: 1 },
            Step { id: "b".into(), text: "Proof".into(), order: 2 },
        ];
        let recipe = Recipe::local(uri("r1"), record, Utc::now());
        let texts: Vec<&str> = recipe.sorted_steps().iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Mix", "Proof", "Bake"]);
    }

    #[test]
    fn test_validate_rejects_zero_servings_and_blank_title() {
        assert!(RecipeRecord::new("Soup", 0).validate().is_err());
        assert!(RecipeRecord::new("   ", 2).validate().is_err());
        assert!(RecipeRecord::new("Soup", 2).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_collection_as_sub_recipe() {
        let mut record = RecipeRecord::new("Lasagne", 4);
        record
            .sub_recipes
            .insert(AtUri::parse("at://did:plc:alice/app.pantry.collection/c1").unwrap());
        assert!(matches!(
            record.validate(),
            Err(ValidationFault::WrongKind { .. })
        ));
    }

    #[test]
    fn test_json_uses_camel_case_and_flattens_record() {
        let mut record = RecipeRecord::new("Tea", 1);
        record.ingredients.push(Ingredient::new("i1", "Water").with_amount(250.0, "ml"));
        let recipe = Recipe::remote(uri("r2"), record, Some("bafy".into()), Utc::now());
        let json = serde_json::to_value(&recipe).unwrap();
        assert_eq!(json["title"], "Tea");
        assert_eq!(json["pendingSync"], false);
        assert_eq!(json["cid"], "bafy");
        assert!(json.get("record").is_none());

        let back: Recipe = serde_json::from_value(json).unwrap();
        assert_eq!(back, recipe);
    }
}
