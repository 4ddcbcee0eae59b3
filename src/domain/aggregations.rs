use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ids::PlaceId;
use crate::domain::mentions::Mention;

pub const MAX_TOP_SNIPPETS: usize = 5;

/// Attribution pointer into the upstream thread. Downstream UIs fetch the
/// content from the permalink at render time; we never hold the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopSnippet {
    pub permalink: String,
    pub score: i32,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub length: i32,
}

impl From<&Mention> for TopSnippet {
    fn from(mention: &Mention) -> Self {
        Self {
            permalink: mention.permalink.clone(),
            score: mention.score,
            timestamp: mention.posted_at,
            hash: mention.content_hash.clone(),
            length: mention.content_length,
        }
    }
}

/// Picks up to five snippets ordered by score desc then recency desc.
pub fn select_top_snippets(mentions: &[Mention]) -> Vec<TopSnippet> {
    let mut sorted: Vec<&Mention> = mentions.iter().collect();
    sorted.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.posted_at.cmp(&a.posted_at))
    });
    sorted
        .into_iter()
        .take(MAX_TOP_SNIPPETS)
        .map(TopSnippet::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceAggregation {
    pub place_id: PlaceId,
    pub iconic_score: f64,
    pub trending_score: f64,
    pub unique_threads: i64,
    pub total_mentions: i64,
    pub total_upvotes: i64,
    pub mentions_90d: i64,
    pub last_seen: Option<DateTime<Utc>>,
    pub top_snippets: Vec<TopSnippet>,
    pub computed_at: DateTime<Utc>,
}
