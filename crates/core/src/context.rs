//! Context retrieval contract used to ground planning prompts.
//!
//! Retrieval is best-effort: sources never fail the caller and an empty result
//! is a valid answer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::TenantId;
use crate::text::truncate_chars;

pub const EXCERPT_MAX_CHARS: usize = 400;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub id: String,
    pub tenant_id: TenantId,
    pub title: String,
    /// Comma separated.
    pub tags: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextQuery {
    pub text: Option<String>,
    pub tags: Option<String>,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub title: String,
    pub tags: Vec<String>,
    pub excerpt: String,
}

#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn search(&self, tenant_id: &TenantId, query: &ContextQuery) -> Vec<ContextSnippet>;
}

#[derive(Clone, Debug, Default)]
pub struct NoContext;

#[async_trait]
impl ContextSource for NoContext {
    async fn search(&self, _tenant_id: &TenantId, _query: &ContextQuery) -> Vec<ContextSnippet> {
        Vec::new()
    }
}

pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',').map(|tag| tag.trim().to_lowercase()).filter(|tag| !tag.is_empty()).collect()
}

/// Filters entries by every requested tag, scores them by query-term overlap
/// and returns the best `limit` as snippets. Newer entries win ties.
pub fn rank_entries(entries: &[ContextEntry], query: &ContextQuery) -> Vec<ContextSnippet> {
    let required_tags = query.tags.as_deref().map(parse_tags).unwrap_or_default();
    let terms = query.text.as_deref().map(query_terms).unwrap_or_default();

    let mut scored: Vec<(usize, &ContextEntry)> = entries
        .iter()
        .filter(|entry| {
            let entry_tags = entry.tags.to_lowercase();
            required_tags.iter().all(|tag| entry_tags.contains(tag.as_str()))
        })
        .filter_map(|entry| {
            if terms.is_empty() {
                return Some((0, entry));
            }
            let haystack = format!("{} {}", entry.title, entry.content).to_lowercase();
            let score = terms.iter().filter(|term| haystack.contains(term.as_str())).count();
            (score > 0).then_some((score, entry))
        })
        .collect();

    scored.sort_by(|(left_score, left), (right_score, right)| {
        right_score.cmp(left_score).then_with(|| right.created_at.cmp(&left.created_at))
    });

    scored
        .into_iter()
        .take(query.limit)
        .map(|(_, entry)| ContextSnippet {
            title: entry.title.clone(),
            tags: parse_tags(&entry.tags),
            excerpt: truncate_chars(&entry.content, EXCERPT_MAX_CHARS),
        })
        .collect()
}

/// Renders snippets into a prompt block capped at `max_chars` characters.
pub fn render_snippets(snippets: &[ContextSnippet], max_chars: usize) -> String {
    let rendered = snippets
        .iter()
        .map(|snippet| {
            if snippet.tags.is_empty() {
                format!("- {}: {}", snippet.title, snippet.excerpt)
            } else {
                format!("- {} [{}]: {}", snippet.title, snippet.tags.join(", "), snippet.excerpt)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    truncate_chars(&rendered, max_chars)
}

fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|term| term.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}
