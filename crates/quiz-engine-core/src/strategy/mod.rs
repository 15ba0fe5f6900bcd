//! Strategy registry and the pieces every selection policy shares.

mod category;
mod history;
mod peers;
mod random;
mod rotation;
mod similar_items;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::outcome::{CandidateDetail, FormattedItem, StrategySummary};
use crate::{
    generate_distractors, CategoryId, EngineError, Item, ItemId, LearnerId, QuizStore,
    ResponseFilter, ResponseRecord, Signal, DISTRACTOR_COUNT,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    UniformRandom,
    CategoryExact,
    CategoryBest,
    CategoryWorst,
    UnseenOrStale,
    PastCorrect,
    PastIncorrect,
    UserSimilarityPositive,
    UserSimilarityNegative,
    ItemSimilarityPositive,
    ItemSimilarityNegative,
}

impl StrategyName {
    pub const ALL: [Self; 11] = [
        Self::UniformRandom,
        Self::CategoryExact,
        Self::CategoryBest,
        Self::CategoryWorst,
        Self::UnseenOrStale,
        Self::PastCorrect,
        Self::PastIncorrect,
        Self::UserSimilarityPositive,
        Self::UserSimilarityNegative,
        Self::ItemSimilarityPositive,
        Self::ItemSimilarityNegative,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UniformRandom => "uniform_random",
            Self::CategoryExact => "category_exact",
            Self::CategoryBest => "category_best",
            Self::CategoryWorst => "category_worst",
            Self::UnseenOrStale => "unseen_or_stale",
            Self::PastCorrect => "past_correct",
            Self::PastIncorrect => "past_incorrect",
            Self::UserSimilarityPositive => "user_similarity_positive",
            Self::UserSimilarityNegative => "user_similarity_negative",
            Self::ItemSimilarityPositive => "item_similarity_positive",
            Self::ItemSimilarityNegative => "item_similarity_negative",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == value)
    }

    #[must_use]
    pub fn requirement(self) -> Requirement {
        match self {
            Self::UniformRandom => Requirement::Nothing,
            Self::CategoryExact => Requirement::Category,
            _ => Requirement::Learner,
        }
    }

    #[must_use]
    pub fn descriptor(self) -> StrategyDescriptor {
        let (description, output_fields): (&'static str, &'static [&'static str]) = match self {
            Self::UniformRandom => ("Ten items drawn uniformly from the whole catalog.", &[]),
            Self::CategoryExact => {
                ("Ten items drawn uniformly from the requested category.", &[])
            }
            Self::CategoryBest => (
                "Ten items from the category the learner answers most accurately.",
                &["categoryId", "correctRate", "categoryAttempts"],
            ),
            Self::CategoryWorst => (
                "Ten items from the category the learner answers least accurately.",
                &["categoryId", "correctRate", "categoryAttempts"],
            ),
            Self::UnseenOrStale => (
                "Never-answered items first, then the items answered longest ago; re-shown items rotate to the back.",
                &["source", "lastAnsweredAt", "selectionKind", "unseenCount", "staleCount", "rotatedCount"],
            ),
            Self::PastCorrect => (
                "Items the learner has answered correctly, weighted by hit rate and volume.",
                &["rate", "eventCount", "attempts", "lastAnsweredAt", "availableCount", "meanRate", "selectedEventCount"],
            ),
            Self::PastIncorrect => (
                "Items the learner has missed, weighted by miss rate and volume.",
                &["rate", "eventCount", "attempts", "lastAnsweredAt", "availableCount", "meanRate", "selectedEventCount"],
            ),
            Self::UserSimilarityPositive => (
                "Unanswered items that learners with similar results tend to miss.",
                &["peerRate", "peerAttempts", "similarLearners"],
            ),
            Self::UserSimilarityNegative => (
                "Unanswered items that learners with similar results tend to get right.",
                &["peerRate", "peerAttempts", "similarLearners"],
            ),
            Self::ItemSimilarityPositive => (
                "Unanswered items whose miss pattern resembles items the learner got wrong.",
                &["maxSimilarity", "seedCount", "seedItems", "similarItemsFound"],
            ),
            Self::ItemSimilarityNegative => (
                "Unanswered items whose success pattern resembles items the learner got right.",
                &["maxSimilarity", "seedCount", "seedItems", "similarItemsFound"],
            ),
        };

        StrategyDescriptor {
            name: self,
            description,
            required_inputs: self.requirement().field_names().to_vec(),
            output_fields: output_fields.to_vec(),
        }
    }

    /// Checks required input without touching the store.
    ///
    /// # Errors
    /// Returns [`EngineError::Validation`] naming the missing field.
    pub fn validate(self, input: &StrategyInput) -> Result<(), EngineError> {
        match self.requirement() {
            Requirement::Nothing => Ok(()),
            Requirement::Learner => input.require_learner(self).map(|_| ()),
            Requirement::Category => input.require_category(self).map(|_| ()),
        }
    }

    pub(crate) fn execute<S, R>(self, scope: RunScope<'_, S, R>) -> Result<Selection, EngineError>
    where
        S: QuizStore + ?Sized,
        R: Rng + ?Sized,
    {
        match self {
            Self::UniformRandom => random::uniform_random(scope),
            Self::CategoryExact => category::category_exact(scope),
            Self::CategoryBest => category::category_ranked(scope, self, Rank::Best),
            Self::CategoryWorst => category::category_ranked(scope, self, Rank::Worst),
            Self::UnseenOrStale => rotation::unseen_or_stale(scope, self),
            Self::PastCorrect => history::past_events(scope, self, ResponseFilter::CorrectOnly),
            Self::PastIncorrect => history::past_events(scope, self, ResponseFilter::IncorrectOnly),
            Self::UserSimilarityPositive => peers::similar_learners(scope, self, Signal::Failure),
            Self::UserSimilarityNegative => {
                peers::similar_learners(scope, self, Signal::Correctness)
            }
            Self::ItemSimilarityPositive => {
                similar_items::similar_items(scope, self, Signal::Failure)
            }
            Self::ItemSimilarityNegative => {
                similar_items::similar_items(scope, self, Signal::Correctness)
            }
        }
    }
}

impl Display for StrategyName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Requirement {
    Nothing,
    Learner,
    Category,
}

impl Requirement {
    #[must_use]
    pub fn field_names(self) -> &'static [&'static str] {
        match self {
            Self::Nothing => &[],
            Self::Learner => &["learnerId"],
            Self::Category => &["categoryId"],
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDescriptor {
    pub name: StrategyName,
    pub description: &'static str,
    pub required_inputs: Vec<&'static str>,
    pub output_fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyInput {
    #[serde(default)]
    pub learner_id: Option<LearnerId>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

impl StrategyInput {
    #[must_use]
    pub fn for_learner(learner_id: LearnerId) -> Self {
        Self { learner_id: Some(learner_id), category_id: None }
    }

    #[must_use]
    pub fn for_category(category_id: CategoryId) -> Self {
        Self { learner_id: None, category_id: Some(category_id) }
    }

    pub(crate) fn require_learner(&self, name: StrategyName) -> Result<LearnerId, EngineError> {
        self.learner_id
            .ok_or_else(|| EngineError::Validation(format!("{name} requires learnerId")))
    }

    pub(crate) fn require_category(&self, name: StrategyName) -> Result<CategoryId, EngineError> {
        self.category_id
            .ok_or_else(|| EngineError::Validation(format!("{name} requires categoryId")))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Rank {
    Best,
    Worst,
}

/// Everything one strategy invocation may touch.
pub(crate) struct RunScope<'a, S: ?Sized, R: ?Sized> {
    pub store: &'a mut S,
    pub rng: &'a mut R,
    pub catalog: &'a [Item],
    pub input: &'a StrategyInput,
    pub now: OffsetDateTime,
}

/// What a strategy hands back to the orchestrator on success.
#[derive(Debug)]
pub(crate) struct Selection {
    pub items: Vec<FormattedItem>,
    pub message: String,
    pub summary: Option<StrategySummary>,
    pub degradations: Vec<String>,
}

/// Formats selected items and keeps count of short distractor sets.
pub(crate) struct ItemFormatter<'p> {
    primary: &'p [Item],
    fallback: Option<&'p [Item]>,
    items: Vec<FormattedItem>,
    short: usize,
}

impl<'p> ItemFormatter<'p> {
    pub fn new(primary: &'p [Item], fallback: Option<&'p [Item]>) -> Self {
        Self { primary, fallback, items: Vec::new(), short: 0 }
    }

    pub fn push<R>(&mut self, item: &Item, detail: Option<CandidateDetail>, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        let incorrect_answers = generate_distractors(item, self.primary, self.fallback, rng);
        if incorrect_answers.len() < DISTRACTOR_COUNT {
            self.short += 1;
        }
        self.items.push(FormattedItem {
            id: item.id,
            media: item.media.clone(),
            correct_answer: item.correct_answer.clone(),
            incorrect_answers,
            category_id: item.category_id,
            detail,
        });
    }

    pub fn finish(self, message: String, summary: Option<StrategySummary>) -> Selection {
        let mut degradations = Vec::new();
        if self.short > 0 {
            degradations.push(format!(
                "{} of {} items carry fewer than {DISTRACTOR_COUNT} incorrect answers; the distractor pool holds too few distinct answers",
                self.short,
                self.items.len()
            ));
        }
        Selection { items: self.items, message, summary, degradations }
    }
}

/// Per-item aggregate over a set of response records.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ItemTally {
    pub attempts: u32,
    pub events: u32,
    pub last_answered_at: OffsetDateTime,
}

impl ItemTally {
    pub fn rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        f64::from(self.events) / f64::from(self.attempts)
    }
}

/// Tally records per item, counting as events those `is_event` admits.
pub(crate) fn tally_by_item<'a, I, F>(records: I, is_event: F) -> BTreeMap<ItemId, ItemTally>
where
    I: IntoIterator<Item = &'a ResponseRecord>,
    F: Fn(&ResponseRecord) -> bool,
{
    let mut tallies: BTreeMap<ItemId, ItemTally> = BTreeMap::new();
    for record in records {
        let event = u32::from(is_event(record));
        tallies
            .entry(record.item_id)
            .and_modify(|tally| {
                tally.attempts += 1;
                tally.events += event;
                if record.answered_at > tally.last_answered_at {
                    tally.last_answered_at = record.answered_at;
                }
            })
            .or_insert(ItemTally {
                attempts: 1,
                events: event,
                last_answered_at: record.answered_at,
            });
    }
    tallies
}

pub(crate) fn catalog_index(catalog: &[Item]) -> BTreeMap<ItemId, &Item> {
    catalog.iter().map(|item| (item.id, item)).collect()
}

pub(crate) fn answered_items(records: &[ResponseRecord]) -> Vec<ItemId> {
    let mut items: Vec<ItemId> = records.iter().map(|record| record.item_id).collect();
    items.sort_unstable();
    items.dedup();
    items
}

#[cfg(test)]
pub(crate) mod fixtures;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_names_round_trip_through_parse() {
        for name in StrategyName::ALL {
            assert_eq!(StrategyName::parse(name.as_str()), Some(name));
            assert_eq!(name.descriptor().name, name);
        }
        assert_eq!(StrategyName::parse("collaborative"), None);
    }

    #[test]
    fn validation_names_the_missing_field() {
        let err = match StrategyName::PastCorrect.validate(&StrategyInput::default()) {
            Err(err) => err,
            Ok(()) => panic!("missing learner should fail validation"),
        };
        assert_eq!(err, EngineError::Validation("past_correct requires learnerId".to_string()));
        assert!(StrategyName::CategoryExact
            .validate(&StrategyInput::for_learner(LearnerId(1)))
            .is_err());
        assert!(StrategyName::UniformRandom.validate(&StrategyInput::default()).is_ok());
    }

    #[test]
    fn descriptors_list_required_inputs() {
        assert_eq!(StrategyName::CategoryExact.descriptor().required_inputs, vec!["categoryId"]);
        assert!(StrategyName::UniformRandom.descriptor().required_inputs.is_empty());
        assert_eq!(StrategyName::UnseenOrStale.descriptor().required_inputs, vec!["learnerId"]);
    }

    #[test]
    fn strategy_input_deserializes_camel_case_and_missing_fields() {
        let input: StrategyInput = match serde_json::from_str(r#"{"learnerId": 12}"#) {
            Ok(input) => input,
            Err(err) => panic!("input should parse: {err}"),
        };
        assert_eq!(input, StrategyInput::for_learner(LearnerId(12)));
    }

    #[test]
    fn tally_tracks_attempts_events_and_latest_answer() {
        let records = vec![
            fixtures::response(1, 1, 10, true, 5),
            fixtures::response(2, 1, 10, false, 9),
            fixtures::response(3, 1, 11, false, 2),
        ];
        let tallies = tally_by_item(&records, |record| !record.correct);
        let Some(first) = tallies.get(&ItemId(10)) else {
            panic!("item 10 should be tallied");
        };
        assert_eq!(first.attempts, 2);
        assert_eq!(first.events, 1);
        assert_eq!(first.last_answered_at, fixtures::at(9));
        assert!((first.rate() - 0.5).abs() < f64::EPSILON);
    }
}
