#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use serde_json::Value;

use chowrank::domain::mentions::NewMention;
use chowrank::domain::repositories::MentionRepository;

use crate::helpers::{seed_aggregation, seed_city, seed_place, spawn_app};

#[tokio::test]
async fn unknown_and_malformed_ids_are_404() {
    let app = spawn_app().await;

    let response = reqwest::get(app.api_url(&format!("/places/{}", uuid::Uuid::new_v4())))
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["error"]["code"], "PLACE_NOT_FOUND");

    let response = reqwest::get(app.api_url("/places/not-a-uuid"))
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn detail_includes_aggregation_and_recent_mentions() {
    let app = spawn_app().await;
    let city = seed_city(&app, "New York City", "US", &["nyc"]).await;
    let katz = seed_place(&app, city.id, "Katz's Delicatessen", &["deli"]).await;
    seed_aggregation(&app, katz, 91.0, 40.0).await;

    // 12 mentions: the endpoint caps recency at 10
    let mentions: Vec<NewMention> = (0..12)
        .map(|i| {
            NewMention::from_text(
                Some(katz),
                "FoodNYC",
                &format!("t3_post{i}"),
                None,
                i * 3,
                Utc::now() - Duration::days(i64::from(i)),
                &format!("/r/FoodNYC/comments/t3_post{i}"),
                "the pastrami here is unreal",
            )
        })
        .collect();
    MentionRepository::insert_batch(&app.repos, mentions)
        .await
        .expect("insert mentions");

    let response = reqwest::get(app.api_url(&format!("/places/{katz}")))
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    let cache = response
        .headers()
        .get("cache-control")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cache.contains("max-age=600"), "got {cache}");

    let body: Value = response.json().await.expect("json");
    let data = &body["data"];

    assert_eq!(data["place"]["name"], "Katz's Delicatessen");
    assert_eq!(data["city"]["name"], "New York City");
    assert!(data["coordinates"]["lat"].is_number());
    assert_eq!(data["aggregation"]["iconic_score"], 91.0);

    let recent = data["recent_mentions"].as_array().unwrap();
    assert_eq!(recent.len(), 10);
    // Mentions carry attribution metadata, never content
    assert_eq!(recent[0]["content_length"], 27);
    assert_eq!(recent[0]["content_hash"].as_str().unwrap().len(), 64);
    assert!(recent[0].get("body").is_none());
    assert!(recent[0].get("text").is_none());
}

#[tokio::test]
async fn detail_without_aggregation_still_serves() {
    let app = spawn_app().await;
    let city = seed_city(&app, "Austin", "US", &[]).await;
    let place = seed_place(&app, city.id, "Franklin Barbecue", &["bbq"]).await;

    let body: Value = reqwest::get(app.api_url(&format!("/places/{place}")))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");

    assert_eq!(body["data"]["place"]["name"], "Franklin Barbecue");
    assert!(body["data"].get("aggregation").is_none());
    assert_eq!(body["data"]["recent_mentions"].as_array().unwrap().len(), 0);
}
