use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationFault;
use crate::uri::{AtUri, EntityKind};

pub const COLLECTION_NAME_MAX: usize = 100;
pub const COLLECTION_DESCRIPTION_MAX: usize = 500;
pub const COLLECTION_RECIPES_MAX: usize = 1000;

/// Collection body as it is stored in the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub recipe_uris: Vec<AtUri>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionRecord {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            description: None,
            recipe_uris: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationFault> {
        let name_len = self.name.chars().count();
        if self.name.trim().is_empty() {
            return Err(ValidationFault::field("name", "must not be empty"));
        }
        if name_len > COLLECTION_NAME_MAX {
            return Err(ValidationFault::field(
                "name",
                format!("{name_len} characters exceeds {COLLECTION_NAME_MAX}"),
            ));
        }
        if let Some(description) = &self.description {
            let len = description.chars().count();
            if len > COLLECTION_DESCRIPTION_MAX {
                return Err(ValidationFault::field(
                    "description",
                    format!("{len} characters exceeds {COLLECTION_DESCRIPTION_MAX}"),
                ));
            }
        }
        if self.recipe_uris.len() > COLLECTION_RECIPES_MAX {
            return Err(ValidationFault::field(
                "recipeUris",
                format!(
                    "{} entries exceeds {COLLECTION_RECIPES_MAX}",
                    self.recipe_uris.len()
                ),
            ));
        }
        for uri in &self.recipe_uris {
            uri.expect_kind(EntityKind::Recipe)?;
        }
        if self.updated_at < self.created_at {
            return Err(ValidationFault::field(
                "updatedAt",
                "must not be earlier than createdAt",
            ));
        }
        Ok(())
    }

    /// Bump `updated_at`, never moving it before `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at).max(self.updated_at);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub uri: AtUri,
    #[serde(flatten)]
    pub record: CollectionRecord,
}

impl Collection {
    pub fn new(uri: AtUri, record: CollectionRecord) -> Self {
        Self { uri, record }
    }

    pub fn contains(&self, recipe: &AtUri) -> bool {
        self.record.recipe_uris.contains(recipe)
    }

    /// Copy of this collection with every occurrence of `recipe` removed,
    /// or `None` when the recipe is not a member.
    pub fn without_recipe(&self, recipe: &AtUri, now: DateTime<Utc>) -> Option<Collection> {
        if !self.contains(recipe) {
            return None;
        }
        let mut updated = self.clone();
        updated.record.recipe_uris.retain(|u| u != recipe);
        updated.record.touch(now);
        Some(updated)
    }
}

/// Partial update for a remote collection record. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_uris: Option<Vec<AtUri>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CollectionPatch {
    pub fn recipe_uris(record: &CollectionRecord) -> Self {
        Self {
            recipe_uris: Some(record.recipe_uris.clone()),
            updated_at: Some(record.updated_at),
            ..Default::default()
        }
    }

    /// Patch that replaces every mutable field with the values in `record`.
    pub fn full(record: &CollectionRecord) -> Self {
        Self {
            name: Some(record.name.clone()),
            description: Some(record.description.clone()),
            recipe_uris: Some(record.recipe_uris.clone()),
            updated_at: Some(record.updated_at),
        }
    }

    pub fn apply_to(&self, record: &mut CollectionRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(description) = &self.description {
            record.description = description.clone();
        }
        if let Some(uris) = &self.recipe_uris {
            record.recipe_uris = uris.clone();
        }
        if let Some(updated_at) = self.updated_at {
            record.updated_at = updated_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn recipe(key: &str) -> AtUri {
        AtUri::parse(&format!("at://did:plc:bob/app.pantry.recipe/{key}")).unwrap()
    }

    #[test]
    fn test_name_limits() {
        let now = Utc::now();
        assert!(CollectionRecord::new("", now).validate().is_err());
        assert!(CollectionRecord::new("x".repeat(100), now).validate().is_ok());
        assert!(CollectionRecord::new("x".repeat(101), now).validate().is_err());
    }

    #[test]
    fn test_description_and_size_limits() {
        let now = Utc::now();
        let mut record = CollectionRecord::new("Weeknight", now);
        record.description = Some("d".repeat(501));
        assert!(record.validate().is_err());
        record.description = Some("d".repeat(500));
        assert!(record.validate().is_ok());

        record.recipe_uris = (0..1001).map(|i| recipe(&format!("r{i}"))).collect();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_updated_before_created_is_invalid() {
        let now = Utc::now();
        let mut record = CollectionRecord::new("Soups", now);
        record.updated_at = now - Duration::seconds(1);
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_without_recipe_removes_all_occurrences() {
        let now = Utc::now();
        let mut record = CollectionRecord::new("Bakes", now);
        record.recipe_uris = vec![recipe("a"), recipe("b"), recipe("a")];
        let collection = Collection::new(
            AtUri::parse("at://did:plc:bob/app.pantry.collection/c1").unwrap(),
            record,
        );

        let later = now + Duration::seconds(5);
        let updated = collection.without_recipe(&recipe("a"), later).unwrap();
        assert_eq!(updated.record.recipe_uris, vec![recipe("b")]);
        assert_eq!(updated.record.updated_at, later);
        assert!(updated.without_recipe(&recipe("a"), later).is_none());
    }

    #[test]
    fn test_patch_only_touches_set_fields() {
        let now = Utc::now();
        let mut record = CollectionRecord::new("Old", now);
        record.description = Some("keep".into());
        let patch = CollectionPatch {
            name: Some("New".into()),
            ..Default::default()
        };
        patch.apply_to(&mut record);
        assert_eq!(record.name, "New");
        assert_eq!(record.description.as_deref(), Some("keep"));
    }
}
