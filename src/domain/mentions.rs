use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::ids::{MentionId, PlaceId};

/// One reference to a place in a discussion thread, reduced to
/// attribution-safe metadata. The raw text never leaves the ingest handler:
/// only its SHA-256 and character length are retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub id: MentionId,
    pub place_id: Option<PlaceId>,
    pub subreddit: String,
    pub post_id: String,
    pub comment_id: Option<String>,
    pub score: i32,
    pub posted_at: DateTime<Utc>,
    pub permalink: String,
    pub content_hash: String,
    pub content_length: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMention {
    pub place_id: Option<PlaceId>,
    pub subreddit: String,
    pub post_id: String,
    pub comment_id: Option<String>,
    pub score: i32,
    pub posted_at: DateTime<Utc>,
    pub permalink: String,
    pub content_hash: String,
    pub content_length: i32,
}

impl NewMention {
    /// Builds the compliance-safe record from the original text, which is
    /// hashed, measured, and dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn from_text(
        place_id: Option<PlaceId>,
        subreddit: &str,
        post_id: &str,
        comment_id: Option<&str>,
        score: i32,
        posted_at: DateTime<Utc>,
        permalink: &str,
        text: &str,
    ) -> Self {
        Self {
            place_id,
            subreddit: subreddit.to_string(),
            post_id: post_id.to_string(),
            comment_id: comment_id.map(str::to_string),
            score,
            posted_at,
            permalink: permalink.to_string(),
            content_hash: content_hash(text),
            content_length: text.chars().count() as i32,
        }
    }
}

pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
