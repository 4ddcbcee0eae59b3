#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::Value;

use crate::helpers::{
    mark_ranked_and_refresh, seed_aggregation, seed_city, seed_place, spawn_app,
};

#[tokio::test]
async fn missing_city_is_a_400_with_machine_code() {
    let app = spawn_app().await;

    let response = reqwest::get(app.api_url("/search?type=iconic"))
        .await
        .expect("request");
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "MISSING_PARAM");
    assert!(body["meta"]["timestamp"].is_string());
}

#[tokio::test]
async fn invalid_type_is_rejected() {
    let app = spawn_app().await;
    seed_city(&app, "New York City", "US", &["nyc"]).await;

    let response = reqwest::get(app.api_url("/search?city=nyc&type=popular"))
        .await
        .expect("request");
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "INVALID_TYPE");
}

#[tokio::test]
async fn unknown_city_is_a_404() {
    let app = spawn_app().await;

    let response = reqwest::get(app.api_url("/search?city=atlantis&type=iconic"))
        .await
        .expect("request");
    assert_eq!(response.status(), 404);

    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "CITY_NOT_FOUND");
}

#[tokio::test]
async fn unranked_city_serves_name_ordered_pois() {
    let app = spawn_app().await;
    let city = seed_city(&app, "Austin", "US", &[]).await;
    seed_place(&app, city.id, "Veracruz All Natural", &["mexican"]).await;
    seed_place(&app, city.id, "Franklin Barbecue", &["bbq"]).await;
    seed_place(&app, city.id, "Loro", &["asian", "bbq"]).await;

    let response = reqwest::get(app.api_url("/search?city=austin&type=iconic"))
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    let cache = response
        .headers()
        .get("cache-control")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cache.contains("max-age=300"), "got {cache}");

    let body: Value = response.json().await.expect("json body");
    let data = &body["data"];
    assert_eq!(data["ranked"], false);
    assert_eq!(data["rank_source"], "unranked_osm");
    assert_eq!(data["pagination"]["total"], 3);
    assert_eq!(data["pagination"]["has_more"], false);

    let names: Vec<&str> = data["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["Franklin Barbecue", "Loro", "Veracruz All Natural"]
    );

    // Unranked rows carry no score or rank
    assert!(data["results"][0].get("score").is_none());
    assert!(data["results"][0].get("rank").is_none());
}

#[tokio::test]
async fn ranked_city_serves_projection_with_dense_ranks() {
    let app = spawn_app().await;
    let city = seed_city(&app, "New York City", "US", &["nyc"]).await;

    let katz = seed_place(&app, city.id, "Katz's Delicatessen", &["deli"]).await;
    let lucali = seed_place(&app, city.id, "Lucali", &["pizza"]).await;
    let roberta = seed_place(&app, city.id, "Roberta's", &["pizza"]).await;

    seed_aggregation(&app, katz, 91.0, 40.0).await;
    seed_aggregation(&app, lucali, 78.0, 65.0).await;
    seed_aggregation(&app, roberta, 64.0, 80.0).await;
    mark_ranked_and_refresh(&app, city.id).await;

    let response = reqwest::get(app.api_url("/search?city=nyc&type=iconic&limit=3"))
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("etag").is_some());

    let cache = response
        .headers()
        .get("cache-control")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cache.contains("max-age=3600"), "got {cache}");
    assert!(cache.contains("stale-while-revalidate=86400"), "got {cache}");

    let body: Value = response.json().await.expect("json body");
    let data = &body["data"];
    assert_eq!(data["ranked"], true);
    assert_eq!(data["rank_source"], "mv_iconic");

    let results = data["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    let ranks: Vec<i64> = results.iter().map(|r| r["rank"].as_i64().unwrap()).collect();
    assert_eq!(ranks, vec![1, 2, 3]);

    let scores: Vec<f64> = results
        .iter()
        .map(|r| r["score"].as_f64().unwrap())
        .collect();
    assert!(scores[0] >= scores[1] && scores[1] >= scores[2]);
    assert_eq!(results[0]["name"], "Katz's Delicatessen");
}

#[tokio::test]
async fn trending_ranking_orders_by_trending_score() {
    let app = spawn_app().await;
    let city = seed_city(&app, "New York City", "US", &["nyc"]).await;

    let katz = seed_place(&app, city.id, "Katz's Delicatessen", &["deli"]).await;
    let roberta = seed_place(&app, city.id, "Roberta's", &["pizza"]).await;
    seed_aggregation(&app, katz, 91.0, 40.0).await;
    seed_aggregation(&app, roberta, 64.0, 80.0).await;
    mark_ranked_and_refresh(&app, city.id).await;

    let response = reqwest::get(app.api_url("/search?city=nyc&type=trending"))
        .await
        .expect("request");
    let body: Value = response.json().await.expect("json body");

    assert_eq!(body["data"]["rank_source"], "mv_trending");
    assert_eq!(body["data"]["results"][0]["name"], "Roberta's");
}

#[tokio::test]
async fn conditional_get_returns_304_with_same_cache_headers() {
    let app = spawn_app().await;
    let city = seed_city(&app, "New York City", "US", &["nyc"]).await;
    let katz = seed_place(&app, city.id, "Katz's Delicatessen", &["deli"]).await;
    seed_aggregation(&app, katz, 91.0, 40.0).await;
    mark_ranked_and_refresh(&app, city.id).await;

    let url = app.api_url("/search?city=nyc&type=iconic&limit=3");
    let first = reqwest::get(&url).await.expect("request");
    assert_eq!(first.status(), 200);
    let etag = first
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .expect("etag header")
        .to_string();

    let client = reqwest::Client::new();
    let second = client
        .get(&url)
        .header("if-none-match", &etag)
        .send()
        .await
        .expect("conditional request");

    assert_eq!(second.status(), 304);
    let cache = second
        .headers()
        .get("cache-control")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cache.contains("max-age=3600"), "got {cache}");
    assert_eq!(second.text().await.expect("body"), "");
}

#[tokio::test]
async fn aliases_resolve_to_the_same_city() {
    let app = spawn_app().await;
    let city = seed_city(&app, "New York City", "US", &["nyc"]).await;
    let katz = seed_place(&app, city.id, "Katz's Delicatessen", &["deli"]).await;
    seed_aggregation(&app, katz, 91.0, 40.0).await;
    mark_ranked_and_refresh(&app, city.id).await;

    let by_alias: Value = reqwest::get(app.api_url("/search?city=nyc&type=trending"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    let by_name: Value =
        reqwest::get(app.api_url("/search?city=new%20york%20city&type=trending"))
            .await
            .expect("request")
            .json()
            .await
            .expect("json");

    assert_eq!(by_alias["data"]["results"], by_name["data"]["results"]);
}

#[tokio::test]
async fn limit_is_clamped_and_offset_drives_has_more() {
    let app = spawn_app().await;
    let city = seed_city(&app, "Austin", "US", &[]).await;
    for i in 0..7 {
        seed_place(&app, city.id, &format!("Taco Stand {i:02}"), &["tacos"]).await;
    }

    let response = reqwest::get(app.api_url("/search?city=austin&type=iconic&limit=500"))
        .await
        .expect("request");
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["data"]["pagination"]["limit"], 100);

    let response = reqwest::get(app.api_url("/search?city=austin&type=iconic&limit=5&offset=0"))
        .await
        .expect("request");
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["data"]["pagination"]["has_more"], true);

    let response = reqwest::get(app.api_url("/search?city=austin&type=iconic&limit=5&offset=5"))
        .await
        .expect("request");
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["data"]["pagination"]["has_more"], false);
    assert_eq!(body["data"]["results"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn cuisine_ranking_requires_cuisine_and_uses_its_projection() {
    let app = spawn_app().await;
    let city = seed_city(&app, "New York City", "US", &["nyc"]).await;
    let lucali = seed_place(&app, city.id, "Lucali", &["pizza"]).await;
    let roberta = seed_place(&app, city.id, "Roberta's", &["pizza"]).await;
    let katz = seed_place(&app, city.id, "Katz's Delicatessen", &["deli"]).await;
    seed_aggregation(&app, lucali, 78.0, 65.0).await;
    seed_aggregation(&app, roberta, 64.0, 80.0).await;
    seed_aggregation(&app, katz, 91.0, 40.0).await;
    mark_ranked_and_refresh(&app, city.id).await;

    let missing = reqwest::get(app.api_url("/search?city=nyc&type=cuisine"))
        .await
        .expect("request");
    assert_eq!(missing.status(), 400);

    let response = reqwest::get(app.api_url("/search?city=nyc&type=cuisine&cuisine=pizza"))
        .await
        .expect("request");
    let body: Value = response.json().await.expect("json");
    let results = body["data"]["results"].as_array().unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["name"], "Lucali");
    assert_eq!(results[0]["rank"], 1);
    assert_eq!(results[1]["name"], "Roberta's");
    assert_eq!(results[1]["rank"], 2);
}

#[tokio::test]
async fn response_envelope_carries_meta() {
    let app = spawn_app().await;
    let city = seed_city(&app, "Austin", "US", &[]).await;
    seed_place(&app, city.id, "Franklin Barbecue", &["bbq"]).await;

    let body: Value = reqwest::get(app.api_url("/search?city=austin&type=iconic"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");

    assert!(body["data"].is_object());
    assert!(body["meta"]["timestamp"].is_string());
    assert!(body["meta"]["response_time_ms"].is_number());
}
