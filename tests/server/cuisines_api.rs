#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::Value;

use crate::helpers::{
    mark_ranked_and_refresh, seed_aggregation, seed_city, seed_place, spawn_app,
};

#[tokio::test]
async fn city_parameter_is_required() {
    let app = spawn_app().await;

    let response = reqwest::get(app.api_url("/cuisines")).await.expect("request");
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["error"]["code"], "MISSING_PARAM");
}

#[tokio::test]
async fn facets_come_from_the_cuisine_projection() {
    let app = spawn_app().await;
    let city = seed_city(&app, "New York City", "US", &["nyc"]).await;

    let lucali = seed_place(&app, city.id, "Lucali", &["pizza"]).await;
    let roberta = seed_place(&app, city.id, "Roberta's", &["pizza"]).await;
    let katz = seed_place(&app, city.id, "Katz's Delicatessen", &["deli"]).await;
    seed_aggregation(&app, lucali, 78.0, 65.0).await;
    seed_aggregation(&app, roberta, 64.0, 80.0).await;
    seed_aggregation(&app, katz, 91.0, 40.0).await;
    mark_ranked_and_refresh(&app, city.id).await;

    let body: Value = reqwest::get(app.api_url("/cuisines?city=nyc"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");

    let cuisines = body["data"]["cuisines"].as_array().unwrap();
    assert_eq!(cuisines.len(), 2);
    // Sorted by ranked-place count desc
    assert_eq!(cuisines[0]["cuisine"], "pizza");
    assert_eq!(cuisines[0]["places"], 2);
    assert_eq!(cuisines[1]["cuisine"], "deli");
    assert_eq!(cuisines[1]["places"], 1);
}
