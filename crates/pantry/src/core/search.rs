//! Offline search over cached recipes.
//!
//! Queries run entirely against the local store. Title and ingredient
//! filters are case-insensitive substring matches; a result matching either
//! one is included. A collection filter narrows the result to the
//! collection's members.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use pantry_api::{AtUri, Collection, EntityKind, Recipe, StoreFault};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::LocalStore;

/// Why a recipe appears in a composite search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchReason {
    Title,
    Ingredients,
    Collection,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::Title => "title",
            MatchReason::Ingredients => "ingredients",
            MatchReason::Collection => "collection",
        }
    }
}

impl std::fmt::Display for MatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite query. Blank strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<String>,
    /// Collection URI, or a collection's display name.
    #[serde(default)]
    pub collection: Option<String>,
}

impl SearchQuery {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn ingredient(mut self, ingredient: impl Into<String>) -> Self {
        self.ingredients.push(ingredient.into());
        self
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    fn normalized_title(&self) -> Option<String> {
        self.title.as_deref().and_then(normalize)
    }

    fn normalized_ingredients(&self) -> Vec<String> {
        self.ingredients.iter().filter_map(|i| normalize(i)).collect()
    }

    fn normalized_collection(&self) -> Option<&str> {
        self.collection
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.normalized_title().is_none()
            && self.normalized_ingredients().is_empty()
            && self.normalized_collection().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub recipe: Recipe,
    /// Sorted, without duplicates.
    pub reasons: Vec<MatchReason>,
}

fn normalize(needle: &str) -> Option<String> {
    let trimmed = needle.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

/// `needle` must already be normalized.
pub fn title_matches(recipe: &Recipe, needle: &str) -> bool {
    recipe.record.title.to_lowercase().contains(needle)
}

/// True if any ingredient name contains any of the normalized `needles`.
pub fn ingredients_match(recipe: &Recipe, needles: &[String]) -> bool {
    recipe.record.ingredients.iter().any(|ingredient| {
        let name = ingredient.name.to_lowercase();
        needles.iter().any(|needle| name.contains(needle.as_str()))
    })
}

fn by_title_then_uri(a: &Recipe, b: &Recipe) -> Ordering {
    a.record
        .title
        .to_lowercase()
        .cmp(&b.record.title.to_lowercase())
        .then_with(|| a.uri.cmp(&b.uri))
}

#[derive(Debug, Clone)]
pub struct SearchIndex {
    store: Arc<LocalStore>,
}

impl SearchIndex {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Recipes whose title contains `needle`. A blank needle matches nothing.
    pub async fn by_title(&self, needle: &str) -> Result<Vec<Recipe>, StoreFault> {
        let Some(needle) = normalize(needle) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<Recipe> = self
            .store
            .get_all::<Recipe>()
            .await?
            .into_iter()
            .filter(|r| title_matches(r, &needle))
            .collect();
        hits.sort_by(by_title_then_uri);
        Ok(hits)
    }

    /// Recipes with at least one ingredient containing any of `needles`.
    pub async fn by_ingredients<S: AsRef<str>>(&self, needles: &[S]) -> Result<Vec<Recipe>, StoreFault> {
        let needles: Vec<String> = needles.iter().filter_map(|n| normalize(n.as_ref())).collect();
        if needles.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<Recipe> = self
            .store
            .get_all::<Recipe>()
            .await?
            .into_iter()
            .filter(|r| ingredients_match(r, &needles))
            .collect();
        hits.sort_by(by_title_then_uri);
        Ok(hits)
    }

    /// Members of a collection, in the collection's order.
    ///
    /// `collection` is a collection URI or display name; an unknown
    /// collection yields an empty list.
    pub async fn by_collection(&self, collection: &str) -> Result<Vec<Recipe>, StoreFault> {
        match self.resolve_collection(collection).await? {
            Some(uri) => self.store.get_by_collection(&uri).await,
            None => Ok(Vec::new()),
        }
    }

    /// Resolve a collection URI or display name (case-insensitive) to a URI.
    pub async fn resolve_collection(&self, collection: &str) -> Result<Option<AtUri>, StoreFault> {
        let collection = collection.trim();
        if let Ok(uri) = AtUri::parse(collection) {
            return Ok((uri.kind() == Some(EntityKind::Collection)).then_some(uri));
        }
        let wanted = collection.to_lowercase();
        let found = self
            .store
            .get_all::<Collection>()
            .await?
            .into_iter()
            .find(|c| c.record.name.to_lowercase() == wanted)
            .map(|c| c.uri);
        Ok(found)
    }

    /// Composite search with per-hit match reasons.
    ///
    /// Title and ingredient filters combine with OR; the collection filter
    /// combines with AND. A collection-only query returns the collection's
    /// members. Results are ordered by title, then URI.
    #[tracing::instrument(skip(self))]
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, StoreFault> {
        let title = query.normalized_title();
        let ingredients = query.normalized_ingredients();
        let text_filter = title.is_some() || !ingredients.is_empty();

        let members: Option<HashSet<AtUri>> = match query.normalized_collection() {
            None => None,
            Some(collection) => {
                let resolved = match self.resolve_collection(collection).await? {
                    Some(uri) => self.store.get::<Collection>(&uri).await?,
                    None => None,
                };
                Some(
                    resolved
                        .map(|c| c.record.recipe_uris.into_iter().collect())
                        .unwrap_or_default(),
                )
            }
        };

        if !text_filter && members.is_none() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for recipe in self.store.get_all::<Recipe>().await? {
            let mut reasons = Vec::new();
            if title.as_deref().is_some_and(|t| title_matches(&recipe, t)) {
                reasons.push(MatchReason::Title);
            }
            if !ingredients.is_empty() && ingredients_match(&recipe, &ingredients) {
                reasons.push(MatchReason::Ingredients);
            }
            if text_filter && reasons.is_empty() {
                continue;
            }
            if let Some(members) = &members {
                if !members.contains(&recipe.uri) {
                    continue;
                }
                reasons.push(MatchReason::Collection);
            }
            hits.push(SearchHit { recipe, reasons });
        }

        hits.sort_by(|a, b| by_title_then_uri(&a.recipe, &b.recipe));
        debug!(hits = hits.len(), "search finished");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use proptest::prelude::*;

    async fn seeded() -> (Arc<LocalStore>, SearchIndex) {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        for recipe in [
            fixtures::recipe("cake", "Chocolate Cake", &["Flour", "Cocoa", "Sugar"]),
            fixtures::recipe("pie", "Apple Pie", &["Apples", "flour", "Butter"]),
            fixtures::recipe("salad", "Green Salad", &["Lettuce", "Olive oil"]),
        ] {
            store.put(&recipe).await.unwrap();
        }
        let index = SearchIndex::new(store.clone());
        (store, index)
    }

    fn titles(recipes: &[Recipe]) -> Vec<&str> {
        recipes.iter().map(|r| r.record.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_title_and_ingredient_lookups_are_case_insensitive() {
        let (_store, index) = seeded().await;
        assert_eq!(titles(&index.by_title("CAKE").await.unwrap()), vec!["Chocolate Cake"]);
        assert_eq!(
            titles(&index.by_ingredients(&["FLOUR"]).await.unwrap()),
            vec!["Apple Pie", "Chocolate Cake"]
        );
        assert!(index.by_title("   ").await.unwrap().is_empty());
        assert!(index.by_ingredients::<&str>(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collection_lookup_by_name_or_uri() {
        let (store, index) = seeded().await;
        let pie = fixtures::recipe_uri("pie");
        let collection = fixtures::collection("c1", "Desserts", &[&pie]);
        store.put(&collection).await.unwrap();

        assert_eq!(titles(&index.by_collection("desserts").await.unwrap()), vec!["Apple Pie"]);
        assert_eq!(
            titles(&index.by_collection(collection.uri.as_str()).await.unwrap()),
            vec!["Apple Pie"]
        );
        assert!(index.by_collection("Mains").await.unwrap().is_empty());
        // A recipe URI is not a collection.
        assert!(index.by_collection(pie.as_str()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collection_only_query_tags_members() {
        let (store, index) = seeded().await;
        let collection = fixtures::collection("c1", "Bakes", &[&fixtures::recipe_uri("cake")]);
        store.put(&collection).await.unwrap();

        let hits = index
            .search(&SearchQuery::default().collection("Bakes"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reasons, vec![MatchReason::Collection]);
    }

    #[tokio::test]
    async fn test_empty_query_and_unknown_collection() {
        let (_store, index) = seeded().await;
        assert!(index.search(&SearchQuery::default()).await.unwrap().is_empty());
        assert!(index
            .search(&SearchQuery::default().title("  ").ingredient(""))
            .await
            .unwrap()
            .is_empty());
        assert!(index
            .search(&SearchQuery::default().title("cake").collection("Nope"))
            .await
            .unwrap()
            .is_empty());
    }

    proptest! {
        #[test]
        fn title_match_ignores_case(title in "[A-Za-z ]{1,20}", start in 0usize..20, len in 1usize..5) {
            let chars: Vec<char> = title.chars().collect();
            prop_assume!(start < chars.len());
            let end = (start + len).min(chars.len());
            let needle: String = chars[start..end].iter().collect();
            prop_assume!(!needle.trim().is_empty());

            let mut recipe = fixtures::recipe("p", "x", &[]);
            recipe.record.title = title.clone();
            let normalized = normalize(&needle.to_uppercase()).unwrap();
            prop_assert!(title_matches(&recipe, &normalized));
        }
    }
}
