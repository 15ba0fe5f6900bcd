//! The uniform result envelope every strategy run produces.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

use crate::{CategoryId, EngineError, ItemId, LearnerId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Error,
}

/// Machine-readable failure class carried next to `status = "error"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InsufficientData,
    StoreAccess,
    Unexpected,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::InsufficientData => "insufficient_data",
            Self::StoreAccess => "store_access",
            Self::Unexpected => "unexpected",
        }
    }
}

impl From<&EngineError> for ErrorKind {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Validation(_) => Self::Validation,
            EngineError::InsufficientData { .. } => Self::InsufficientData,
            EngineError::StoreAccess(_) => Self::StoreAccess,
            EngineError::Unexpected(_) => Self::Unexpected,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    Unseen,
    Stale,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionKind {
    Unseen,
    Stale,
    Mixed,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationDetail {
    pub source: ItemSource,
    #[serde(with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub last_answered_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDetail {
    pub rate: f64,
    pub event_count: u32,
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_answered_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerDetail {
    pub peer_rate: f64,
    pub peer_attempts: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityDetail {
    pub max_similarity: f64,
    pub seed_count: usize,
}

/// Per-item scoring metadata, flattened into the formatted item.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum CandidateDetail {
    Rotation(RotationDetail),
    History(HistoryDetail),
    Peer(PeerDetail),
    Similarity(SimilarityDetail),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormattedItem {
    pub id: ItemId,
    pub media: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
    pub category_id: CategoryId,
    #[serde(flatten)]
    pub detail: Option<CandidateDetail>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub category_id: CategoryId,
    pub correct_rate: f64,
    pub category_attempts: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationSummary {
    pub selection_kind: SelectionKind,
    pub unseen_count: usize,
    pub stale_count: usize,
    pub rotated_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub available_count: usize,
    pub mean_rate: f64,
    pub selected_event_count: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub similar_learners: Vec<LearnerId>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimilaritySummary {
    pub seed_items: usize,
    pub similar_items_found: usize,
}

/// Strategy-level statistics, flattened into the envelope.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum StrategySummary {
    Category(CategorySummary),
    Rotation(RotationSummary),
    History(HistorySummary),
    Peer(PeerSummary),
    Similarity(SimilaritySummary),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationOutcome {
    pub run_id: Ulid,
    pub strategy: String,
    pub items: Vec<FormattedItem>,
    pub item_count: usize,
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degradations: Vec<String>,
    #[serde(flatten)]
    pub summary: Option<StrategySummary>,
}

impl RecommendationOutcome {
    #[must_use]
    pub fn completed(
        run_id: Ulid,
        strategy: impl Into<String>,
        items: Vec<FormattedItem>,
        message: impl Into<String>,
        summary: Option<StrategySummary>,
        degradations: Vec<String>,
    ) -> Self {
        Self {
            run_id,
            strategy: strategy.into(),
            item_count: items.len(),
            items,
            status: OutcomeStatus::Completed,
            message: message.into(),
            error_kind: None,
            degradations,
            summary,
        }
    }

    /// An error outcome never carries items or a summary.
    #[must_use]
    pub fn failed(run_id: Ulid, strategy: impl Into<String>, err: &EngineError) -> Self {
        Self {
            run_id,
            strategy: strategy.into(),
            items: Vec::new(),
            item_count: 0,
            status: OutcomeStatus::Error,
            message: err.to_string(),
            error_kind: Some(ErrorKind::from(err)),
            degradations: Vec::new(),
            summary: None,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}
