use anyhow::Result;
use pantry::testing::{fixtures, TestHarness};
use pantry::{MatchReason, SearchQuery};

async fn seeded() -> Result<TestHarness> {
    let h = TestHarness::new().await;
    for recipe in [
        fixtures::recipe("cake", "Chocolate Cake", &["flour", "cocoa", "eggs"]),
        fixtures::recipe("pie", "Apple Pie", &["apples", "flour", "butter"]),
        fixtures::recipe("soup", "Carrot Soup", &["carrots", "stock"]),
        fixtures::recipe("cupcake", "Vanilla Cupcake", &["sugar", "butter"]),
    ] {
        h.store.put(&recipe).await?;
    }
    Ok(h)
}

#[tokio::test]
async fn test_title_or_ingredient_hits_carry_reasons() -> Result<()> {
    let h = seeded().await?;
    let hits = h
        .search
        .search(&SearchQuery::default().title("cake").ingredient("flour"))
        .await?;

    let summary: Vec<(&str, &[MatchReason])> = hits
        .iter()
        .map(|hit| (hit.recipe.record.title.as_str(), hit.reasons.as_slice()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Apple Pie", &[MatchReason::Ingredients][..]),
            (
                "Chocolate Cake",
                &[MatchReason::Title, MatchReason::Ingredients][..]
            ),
            ("Vanilla Cupcake", &[MatchReason::Title][..]),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_collection_filter_narrows_text_matches() -> Result<()> {
    let h = seeded().await?;
    let bakes = fixtures::collection(
        "bakes",
        "Weekend Bakes",
        &[&fixtures::recipe_uri("cupcake"), &fixtures::recipe_uri("pie")],
    );
    h.store.put(&bakes).await?;

    let hits = h
        .search
        .search(&SearchQuery::default().title("cake").collection(bakes.uri.as_str()))
        .await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].recipe.record.title, "Vanilla Cupcake");
    assert_eq!(hits[0].reasons, vec![MatchReason::Title, MatchReason::Collection]);

    // Same query by display name.
    let by_name = h
        .search
        .search(&SearchQuery::default().title("cake").collection("weekend bakes"))
        .await?;
    assert_eq!(by_name, hits);
    Ok(())
}

#[tokio::test]
async fn test_multiple_ingredients_match_any() -> Result<()> {
    let h = seeded().await?;
    let titles: Vec<String> = h
        .search
        .by_ingredients(&["cocoa", "carrot"])
        .await?
        .into_iter()
        .map(|r| r.record.title)
        .collect();
    assert_eq!(titles, vec!["Carrot Soup", "Chocolate Cake"]);
    Ok(())
}

#[tokio::test]
async fn test_search_sees_local_unsynced_recipes() -> Result<()> {
    let h = seeded().await?;
    h.remote.set_offline(true);
    let draft = h
        .book
        .create_recipe(fixtures::recipe_record("Offline Cake", &["flour"]))
        .await?;

    let hits = h.search.by_title("offline").await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uri, draft.uri);
    assert!(hits[0].pending_sync);
    Ok(())
}
