use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::application::errors::AppError;
use crate::infrastructure::pacing::Pacer;

pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const REDDIT_API_URL: &str = "https://oauth.reddit.com";
const USER_AGENT: &str = "Chowrank/1.0 (discussion ingest)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Refresh the token a minute early so in-flight requests never race expiry.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RedditPost {
    pub id: String,
    pub title: String,
    pub selftext: String,
    pub score: i32,
    pub posted_at: DateTime<Utc>,
    pub permalink: String,
}

#[derive(Debug, Clone)]
pub struct RedditComment {
    pub id: String,
    pub body: String,
    pub score: i32,
    pub posted_at: DateTime<Utc>,
    pub permalink: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// OAuth client-credentials API client. One instance per process: the token
/// cache and the request pacer are shared across handlers.
pub struct RedditClient {
    client: reqwest::Client,
    token_url: String,
    api_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
    pacer: Pacer,
}

impl RedditClient {
    pub fn new(
        client: reqwest::Client,
        token_url: &str,
        api_url: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        Self {
            client,
            token_url: token_url.to_string(),
            api_url: api_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token: Mutex::new(None),
            pacer: Pacer::per_second(),
        }
    }

    /// Top posts of the window for one subreddit.
    pub async fn top_posts(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<RedditPost>, AppError> {
        let token = self.access_token().await?;
        self.pacer.wait().await;

        let url = format!("{}/r/{}/top", self.api_url, subreddit);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .header("User-Agent", USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("t", "month"), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| AppError::upstream(format!("reddit top posts failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::upstream(format!(
                "reddit returned status {} for r/{subreddit}",
                response.status()
            )));
        }

        let listing: Listing<PostData> = response
            .json()
            .await
            .map_err(|e| AppError::upstream(format!("failed to parse reddit listing: {e}")))?;

        Ok(listing
            .data
            .children
            .into_iter()
            .filter_map(|child| into_post(child.data))
            .collect())
    }

    /// Flattened comment tree for one post.
    pub async fn comments(
        &self,
        subreddit: &str,
        post_id: &str,
        limit: u32,
    ) -> Result<Vec<RedditComment>, AppError> {
        let token = self.access_token().await?;
        self.pacer.wait().await;

        let url = format!("{}/r/{}/comments/{}", self.api_url, subreddit, post_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .header("User-Agent", USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("limit", limit.to_string().as_str()), ("depth", "3")])
            .send()
            .await
            .map_err(|e| AppError::upstream(format!("reddit comments failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::upstream(format!(
                "reddit returned status {} for r/{subreddit}/{post_id}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::upstream(format!("failed to parse comment tree: {e}")))?;

        Ok(parse_comment_tree(&body, subreddit, post_id))
    }

    async fn access_token(&self) -> Result<String, AppError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("User-Agent", USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| AppError::upstream(format!("reddit token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::upstream(format!(
                "reddit token endpoint returned status {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::upstream(format!("failed to parse token response: {e}")))?;

        let expires_in = Duration::from_secs(token.expires_in.max(120));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + expires_in.saturating_sub(TOKEN_SLACK),
        });

        Ok(token.access_token)
    }
}

fn into_post(data: PostData) -> Option<RedditPost> {
    // Posts without a timestamp cannot be scored and are rejected outright
    let posted_at = DateTime::from_timestamp(data.created_utc? as i64, 0)?;
    Some(RedditPost {
        id: data.id,
        title: data.title.unwrap_or_default(),
        selftext: data.selftext.unwrap_or_default(),
        score: data.score.unwrap_or(0),
        posted_at,
        permalink: data.permalink.unwrap_or_default(),
    })
}

/// The comments endpoint returns [post listing, comment listing]; comments
/// nest under `replies`, which is an empty string at the leaves.
fn parse_comment_tree(
    body: &serde_json::Value,
    subreddit: &str,
    post_id: &str,
) -> Vec<RedditComment> {
    let mut out = Vec::new();
    if let Some(comment_listing) = body.as_array().and_then(|parts| parts.get(1)) {
        walk_comments(comment_listing, subreddit, post_id, &mut out);
    }
    out
}

fn walk_comments(
    listing: &serde_json::Value,
    subreddit: &str,
    post_id: &str,
    out: &mut Vec<RedditComment>,
) {
    let Some(children) = listing
        .get("data")
        .and_then(|d| d.get("children"))
        .and_then(|c| c.as_array())
    else {
        return;
    };

    for child in children {
        if child.get("kind").and_then(|k| k.as_str()) != Some("t1") {
            continue;
        }
        let Some(data) = child.get("data") else {
            continue;
        };

        let id = data.get("id").and_then(|v| v.as_str()).unwrap_or_default();
        let body = data.get("body").and_then(|v| v.as_str()).unwrap_or_default();
        let created = data
            .get("created_utc")
            .and_then(serde_json::Value::as_f64)
            .and_then(|ts| DateTime::from_timestamp(ts as i64, 0));

        if let Some(posted_at) = created
            && !id.is_empty()
            && !body.is_empty()
        {
            out.push(RedditComment {
                id: id.to_string(),
                body: body.to_string(),
                score: data
                    .get("score")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0) as i32,
                posted_at,
                permalink: format!("/r/{subreddit}/comments/{post_id}/_/{id}"),
            });
        }

        if let Some(replies) = data.get("replies")
            && replies.is_object()
        {
            walk_comments(replies, subreddit, post_id, out);
        }
    }
}

// --- Reddit API types ---

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<ListingChild<T>>,
}

#[derive(Debug, Deserialize)]
struct ListingChild<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    score: Option<i32>,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    permalink: Option<String>,
}
