//! Canned identities and records for tests.

use chrono::Utc;
use pantry_api::{AtUri, Collection, CollectionRecord, Ingredient, Recipe, RecipeRecord};

pub const OWNER_DID: &str = "did:plc:owner";
pub const FRIEND_DID: &str = "did:plc:friend";

pub fn recipe_uri(key: &str) -> AtUri {
    uri(OWNER_DID, "app.pantry.recipe", key)
}

pub fn collection_uri(key: &str) -> AtUri {
    uri(OWNER_DID, "app.pantry.collection", key)
}

pub fn friend_recipe_uri(key: &str) -> AtUri {
    uri(FRIEND_DID, "app.pantry.recipe", key)
}

fn uri(did: &str, nsid: &str, key: &str) -> AtUri {
    match AtUri::parse(&format!("at://{did}/{nsid}/{key}")) {
        Ok(uri) => uri,
        Err(e) => panic!("fixture uri is invalid: {e}"),
    }
}

/// A recipe body with one ingredient per name.
pub fn recipe_record(title: &str, ingredients: &[&str]) -> RecipeRecord {
    let mut record = RecipeRecord::new(title, 4);
    record.ingredients = ingredients
        .iter()
        .enumerate()
        .map(|(i, name)| Ingredient::new(format!("ing-{i}"), *name))
        .collect();
    record
}

/// A synced (non-pending) cached recipe.
pub fn recipe(key: &str, title: &str, ingredients: &[&str]) -> Recipe {
    Recipe::remote(
        recipe_uri(key),
        recipe_record(title, ingredients),
        Some(format!("bafyfixture{key}")),
        Utc::now(),
    )
}

pub fn collection(key: &str, name: &str, members: &[&AtUri]) -> Collection {
    let mut record = CollectionRecord::new(name, Utc::now());
    record.recipe_uris = members.iter().map(|u| (*u).clone()).collect();
    Collection::new(collection_uri(key), record)
}
