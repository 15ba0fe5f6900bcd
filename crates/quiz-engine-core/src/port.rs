//! Data access port consumed by the selection strategies.

use time::OffsetDateTime;

use crate::{CategoryAccuracy, CategoryId, Item, ItemId, LearnerId, ResponseFilter, ResponseRecord};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("{operation} failed: {message}")]
pub struct StoreError {
    pub operation: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self { operation, message: message.into() }
    }
}

/// Read queries plus the single rotation write the engine needs from a backing store.
///
/// Implementations own connection management and any retry policy; the engine
/// issues each call at most once per run.
pub trait QuizStore {
    /// # Errors
    /// Returns [`StoreError`] when the catalog cannot be read.
    fn fetch_all_items(&self) -> Result<Vec<Item>, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] when the category's items cannot be read.
    fn fetch_items_by_category(&self, category_id: CategoryId) -> Result<Vec<Item>, StoreError>;

    /// Every response record of one learner admitted by `filter`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the learner's history cannot be read.
    fn fetch_learner_responses(
        &self,
        learner_id: LearnerId,
        filter: ResponseFilter,
    ) -> Result<Vec<ResponseRecord>, StoreError>;

    /// Learners holding at least one record for each of the two items.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the lookup fails.
    fn fetch_shared_respondents(
        &self,
        item_a: ItemId,
        item_b: ItemId,
    ) -> Result<Vec<LearnerId>, StoreError>;

    /// Batched record read. `None` leaves that axis unrestricted; `Some(&[])` matches nothing.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the batch cannot be read.
    fn fetch_responses_for(
        &self,
        learner_ids: Option<&[LearnerId]>,
        item_ids: Option<&[ItemId]>,
    ) -> Result<Vec<ResponseRecord>, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] when per-category aggregates cannot be read.
    fn fetch_category_accuracy(
        &self,
        learner_id: LearnerId,
    ) -> Result<Vec<CategoryAccuracy>, StoreError>;

    /// Move the latest record of each `(learner_id, item)` pair to `at`, as one committed unit.
    ///
    /// Returns the number of records updated.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the unit fails; no record is changed in that case.
    fn touch_response_timestamps(
        &mut self,
        learner_id: LearnerId,
        item_ids: &[ItemId],
        at: OffsetDateTime,
    ) -> Result<usize, StoreError>;
}
