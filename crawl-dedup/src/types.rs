use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DuplicateType {
    #[serde(rename = "no_duplicate")]
    NoDuplicate,
    #[serde(rename = "task_duplicate")]
    Task,
    #[serde(rename = "url_duplicate")]
    Url,
    #[serde(rename = "content_hash_duplicate")]
    ContentHash,
    #[serde(rename = "title_duplicate")]
    Title,
    #[serde(rename = "semantic_duplicate")]
    Semantic,
    #[serde(rename = "time_window_duplicate")]
    TimeWindow,
}

impl DuplicateType {
    pub fn as_str(self) -> &'static str {
        match self {
            DuplicateType::NoDuplicate => "no_duplicate",
            DuplicateType::Task => "task_duplicate",
            DuplicateType::Url => "url_duplicate",
            DuplicateType::ContentHash => "content_hash_duplicate",
            DuplicateType::Title => "title_duplicate",
            DuplicateType::Semantic => "semantic_duplicate",
            DuplicateType::TimeWindow => "time_window_duplicate",
        }
    }
}

/// Outcome of a full duplicate check. `NoDuplicate` only comes back after
/// every layer passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub duplicate_type: DuplicateType,
    /// Confidence in the verdict, 0..=1.
    pub confidence: f64,
    /// Id of the matched prior record, when known.
    #[serde(default)]
    pub duplicate_id: Option<String>,
    /// Similarity score for the semantic layer.
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DuplicateVerdict {
    pub fn pass() -> Self {
        Self {
            is_duplicate: false,
            duplicate_type: DuplicateType::NoDuplicate,
            confidence: 1.0,
            duplicate_id: None,
            similarity: None,
            reason: None,
        }
    }

    pub fn fresh(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::pass()
        }
    }

    pub fn duplicate(
        duplicate_type: DuplicateType,
        confidence: f64,
        duplicate_id: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            is_duplicate: true,
            duplicate_type,
            confidence,
            duplicate_id,
            similarity: None,
            reason: Some(reason.into()),
        }
    }
}

/// A stored content document, as the index layer sees it. Append-only from
/// the orchestration plane's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContentRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    pub platform: String,
    pub author: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&DuplicateType::ContentHash).unwrap(),
            "\"content_hash_duplicate\""
        );
        assert_eq!(
            serde_json::to_string(&DuplicateType::TimeWindow).unwrap(),
            "\"time_window_duplicate\""
        );
    }

    #[test]
    fn test_pass_verdict_shape() {
        let verdict = DuplicateVerdict::pass();
        assert!(!verdict.is_duplicate);
        assert_eq!(verdict.duplicate_type, DuplicateType::NoDuplicate);
        assert_eq!(verdict.confidence, 1.0);
    }
}
