use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod correlation;
pub mod distractors;
pub mod orchestrator;
pub mod outcome;
pub mod port;
pub mod sampler;
pub mod strategy;

pub use correlation::{similarity, ResponseMatrix, Signal};
pub use distractors::generate_distractors;
pub use orchestrator::{compare_items, run_strategy, run_strategy_by_name, ItemPairSimilarity, RunContext};
pub use outcome::{
    CandidateDetail, ErrorKind, FormattedItem, ItemSource, OutcomeStatus, RecommendationOutcome,
    SelectionKind, StrategySummary,
};
pub use port::{QuizStore, StoreError};
pub use sampler::sample_without_replacement;
pub use strategy::{StrategyDescriptor, StrategyInput, StrategyName};

/// Items emitted per recommendation run.
pub const QUIZ_LENGTH: usize = 10;
/// Incorrect answers attached to every formatted item when the pool allows it.
pub const DISTRACTOR_COUNT: usize = 3;
/// One correct answer plus [`DISTRACTOR_COUNT`] incorrect ones.
pub const MIN_CATALOG_ITEMS: usize = DISTRACTOR_COUNT + 1;
/// Aligned observations required before a correlation is computed.
pub const MIN_COMMON_RESPONSES: usize = 3;
/// Responses a learner needs in a category before it can rank as best or worst.
pub const CATEGORY_MIN_RESPONSES: u32 = 3;
/// Distinct answered items a learner (and each peer) needs for learner similarity.
pub const MIN_SHARED_ITEMS: usize = 5;
pub const SIMILAR_LEARNER_LIMIT: usize = 10;
pub const PEER_MIN_ATTEMPTS: u32 = 2;
pub const PEER_MIN_RATE: f64 = 0.4;
/// Seed items required before item similarity runs.
pub const MIN_SEED_ITEMS: usize = 2;
/// A candidate's best similarity to any seed must exceed this.
pub const SIMILARITY_FLOOR: f64 = 0.1;
pub const SIMILAR_ITEM_POOL: usize = 50;
pub const HISTORY_POOL: usize = 50;
/// Event volume adds `min(count / VOLUME_SCALE, VOLUME_CAP)` to a history weight.
pub const VOLUME_SCALE: f64 = 10.0;
pub const VOLUME_CAP: f64 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DataShortfall {
    /// Nothing to work with at all.
    NoData,
    /// Data exists but does not reach a qualifying minimum.
    BelowThreshold,
}

impl DataShortfall {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::BelowThreshold => "below_threshold",
        }
    }
}

impl Display for DataShortfall {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("insufficient data ({shortfall}): {message}")]
    InsufficientData { shortfall: DataShortfall, message: String },
    #[error("store access error: {0}")]
    StoreAccess(#[from] StoreError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl EngineError {
    pub fn no_data(message: impl Into<String>) -> Self {
        Self::InsufficientData { shortfall: DataShortfall::NoData, message: message.into() }
    }

    pub fn below_threshold(message: impl Into<String>) -> Self {
        Self::InsufficientData { shortfall: DataShortfall::BelowThreshold, message: message.into() }
    }
}

macro_rules! integer_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

integer_id!(ItemId);
integer_id!(CategoryId);
integer_id!(LearnerId);
integer_id!(ResponseId);

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

/// A quiz prompt: an opaque media reference plus its one correct answer.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub media: String,
    pub correct_answer: String,
    pub category_id: CategoryId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub id: ResponseId,
    pub learner_id: LearnerId,
    pub item_id: ItemId,
    pub correct: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub answered_at: OffsetDateTime,
}

impl ResponseRecord {
    /// Whether `self` supersedes `other` as the latest record of a pair.
    ///
    /// Later `answered_at` wins; equal timestamps fall back to the higher record id.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        (self.answered_at, self.id) > (other.answered_at, other.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAccuracy {
    pub category_id: CategoryId,
    pub attempts: u32,
    pub correct_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFilter {
    #[default]
    All,
    CorrectOnly,
    IncorrectOnly,
}

impl ResponseFilter {
    #[must_use]
    pub fn admits(self, correct: bool) -> bool {
        match self {
            Self::All => true,
            Self::CorrectOnly => correct,
            Self::IncorrectOnly => !correct,
        }
    }
}

/// Round to a fixed number of decimals for presentation fields.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn record(id: i64, seconds: i64) -> ResponseRecord {
        ResponseRecord {
            id: ResponseId(id),
            learner_id: LearnerId(1),
            item_id: ItemId(1),
            correct: true,
            answered_at: OffsetDateTime::UNIX_EPOCH + Duration::seconds(seconds),
        }
    }

    #[test]
    fn newer_record_prefers_timestamp_then_record_id() {
        assert!(record(1, 20).is_newer_than(&record(2, 10)));
        assert!(record(3, 10).is_newer_than(&record(2, 10)));
        assert!(!record(2, 10).is_newer_than(&record(2, 10)));
    }

    #[test]
    fn response_filter_admits_matching_outcomes() {
        assert!(ResponseFilter::All.admits(false));
        assert!(ResponseFilter::CorrectOnly.admits(true));
        assert!(!ResponseFilter::CorrectOnly.admits(false));
        assert!(ResponseFilter::IncorrectOnly.admits(false));
    }

    #[test]
    fn store_errors_convert_into_store_access() {
        let err: EngineError = StoreError::new("fetch_all_items", "disk I/O error").into();
        assert!(matches!(err, EngineError::StoreAccess(_)));
        assert!(err.to_string().contains("fetch_all_items"));
    }

    #[test]
    fn insufficient_data_messages_name_the_shortfall() {
        assert_eq!(
            EngineError::no_data("catalog is empty").to_string(),
            "insufficient data (no_data): catalog is empty"
        );
        assert_eq!(
            EngineError::below_threshold("need 4 items").to_string(),
            "insufficient data (below_threshold): need 4 items"
        );
    }
}
