//! Bounded Pearson similarity over aligned binary response vectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use crate::{ItemId, LearnerId, ResponseRecord, MIN_COMMON_RESPONSES};

/// Which raw signal a response contributes to a correlation vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// 1 for a correct answer.
    Correctness,
    /// 1 for a missed answer.
    Failure,
}

impl Signal {
    #[must_use]
    pub fn encode(self, correct: bool) -> u8 {
        match self {
            Self::Correctness => u8::from(correct),
            Self::Failure => u8::from(!correct),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Correctness => "correctness",
            Self::Failure => "failure",
        }
    }
}

pub(crate) fn count_as_f64(count: usize) -> f64 {
    f64::from(u32::try_from(count).unwrap_or(u32::MAX))
}

/// Pearson correlation of two aligned 0/1 vectors, clamped to `[0, 1]`.
///
/// Only the common prefix of the two slices is considered aligned. Fewer than
/// `min_common` aligned entries, or a constant vector on either side, yields 0.
#[must_use]
pub fn similarity(lhs: &[u8], rhs: &[u8], min_common: usize) -> f64 {
    let common = lhs.len().min(rhs.len());
    if common == 0 || common < min_common {
        return 0.0;
    }

    let lhs = &lhs[..common];
    let rhs = &rhs[..common];
    let n = count_as_f64(common);
    let mean_lhs = lhs.iter().map(|value| f64::from(*value)).sum::<f64>() / n;
    let mean_rhs = rhs.iter().map(|value| f64::from(*value)).sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut squares_lhs = 0.0;
    let mut squares_rhs = 0.0;
    for (left, right) in lhs.iter().zip(rhs) {
        let diff_lhs = f64::from(*left) - mean_lhs;
        let diff_rhs = f64::from(*right) - mean_rhs;
        numerator += diff_lhs * diff_rhs;
        squares_lhs += diff_lhs * diff_lhs;
        squares_rhs += diff_rhs * diff_rhs;
    }

    let denominator = (squares_lhs * squares_rhs).sqrt();
    if denominator < f64::EPSILON {
        return 0.0;
    }

    (numerator / denominator).clamp(0.0, 1.0)
}

/// Latest outcome per (learner, item) pair, indexed along both axes.
///
/// Built once per run from a batched read so every correlation is computed in memory.
#[derive(Debug, Clone, Default)]
pub struct ResponseMatrix {
    by_learner: BTreeMap<LearnerId, BTreeMap<ItemId, bool>>,
    by_item: BTreeMap<ItemId, BTreeMap<LearnerId, bool>>,
}

impl ResponseMatrix {
    #[must_use]
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a ResponseRecord>,
    {
        let mut latest: BTreeMap<(LearnerId, ItemId), &ResponseRecord> = BTreeMap::new();
        for record in records {
            latest
                .entry((record.learner_id, record.item_id))
                .and_modify(|current| {
                    if record.is_newer_than(current) {
                        *current = record;
                    }
                })
                .or_insert(record);
        }

        let mut by_learner: BTreeMap<LearnerId, BTreeMap<ItemId, bool>> = BTreeMap::new();
        let mut by_item: BTreeMap<ItemId, BTreeMap<LearnerId, bool>> = BTreeMap::new();
        for ((learner_id, item_id), record) in latest {
            by_learner.entry(learner_id).or_default().insert(item_id, record.correct);
            by_item.entry(item_id).or_default().insert(learner_id, record.correct);
        }

        Self { by_learner, by_item }
    }

    pub fn learners(&self) -> impl Iterator<Item = LearnerId> + '_ {
        self.by_learner.keys().copied()
    }

    #[must_use]
    pub fn shared_item_count(&self, lhs: LearnerId, rhs: LearnerId) -> usize {
        match (self.by_learner.get(&lhs), self.by_learner.get(&rhs)) {
            (Some(left), Some(right)) => left.keys().filter(|item| right.contains_key(item)).count(),
            _ => 0,
        }
    }

    /// Aligned vectors over the learners who answered both items, in learner order.
    #[must_use]
    pub fn item_vectors(&self, lhs: ItemId, rhs: ItemId, signal: Signal) -> (Vec<u8>, Vec<u8>) {
        let (Some(left), Some(right)) = (self.by_item.get(&lhs), self.by_item.get(&rhs)) else {
            return (Vec::new(), Vec::new());
        };
        left.iter()
            .filter_map(|(learner, correct)| {
                right.get(learner).map(|other| (signal.encode(*correct), signal.encode(*other)))
            })
            .unzip()
    }

    /// Aligned vectors over the items both learners answered, in item order.
    #[must_use]
    pub fn learner_vectors(
        &self,
        lhs: LearnerId,
        rhs: LearnerId,
        signal: Signal,
    ) -> (Vec<u8>, Vec<u8>) {
        let (Some(left), Some(right)) = (self.by_learner.get(&lhs), self.by_learner.get(&rhs))
        else {
            return (Vec::new(), Vec::new());
        };
        left.iter()
            .filter_map(|(item, correct)| {
                right.get(item).map(|other| (signal.encode(*correct), signal.encode(*other)))
            })
            .unzip()
    }

    #[must_use]
    pub fn item_similarity(&self, lhs: ItemId, rhs: ItemId, signal: Signal) -> f64 {
        let (left, right) = self.item_vectors(lhs, rhs, signal);
        similarity(&left, &right, MIN_COMMON_RESPONSES)
    }

    #[must_use]
    pub fn learner_similarity(&self, lhs: LearnerId, rhs: LearnerId, signal: Signal) -> f64 {
        let (left, right) = self.learner_vectors(lhs, rhs, signal);
        similarity(&left, &right, MIN_COMMON_RESPONSES)
    }
}

#[cfg(test)]
impl ResponseMatrix {
    fn outcome(&self, learner_id: LearnerId, item_id: ItemId) -> Option<bool> {
        self.by_learner.get(&learner_id).and_then(|outcomes| outcomes.get(&item_id)).copied()
    }

    fn respondent_count(&self, item_id: ItemId) -> usize {
        self.by_item.get(&item_id).map_or(0, BTreeMap::len)
    }
}
