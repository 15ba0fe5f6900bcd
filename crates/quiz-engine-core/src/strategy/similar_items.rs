use std::collections::BTreeSet;

use rand::Rng;
use tracing::debug;

use super::{ItemFormatter, RunScope, Selection, StrategyName};
use crate::outcome::{CandidateDetail, SimilarityDetail, SimilaritySummary, StrategySummary};
use crate::{
    round_to, EngineError, Item, ItemId, QuizStore, ResponseFilter, ResponseMatrix, Signal,
    MIN_SEED_ITEMS, QUIZ_LENGTH, SIMILARITY_FLOOR, SIMILAR_ITEM_POOL,
};

/// Unanswered items whose response pattern tracks the items the learner missed (or got right).
pub(super) fn similar_items<S, R>(
    scope: RunScope<'_, S, R>,
    name: StrategyName,
    signal: Signal,
) -> Result<Selection, EngineError>
where
    S: QuizStore + ?Sized,
    R: Rng + ?Sized,
{
    let RunScope { store, rng, catalog, input, .. } = scope;
    let learner_id = input.require_learner(name)?;
    let history = store.fetch_learner_responses(learner_id, ResponseFilter::All)?;

    let answered: BTreeSet<ItemId> = history.iter().map(|record| record.item_id).collect();
    let seeds: Vec<ItemId> = history
        .iter()
        .filter(|record| signal.encode(record.correct) == 1)
        .map(|record| record.item_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let seed_kind = match signal {
        Signal::Failure => "missed",
        Signal::Correctness => "answered correctly",
    };
    if seeds.is_empty() {
        return Err(EngineError::no_data(format!(
            "learner {learner_id} has no items {seed_kind}"
        )));
    }
    if seeds.len() < MIN_SEED_ITEMS {
        return Err(EngineError::below_threshold(format!(
            "learner {learner_id} needs at least {MIN_SEED_ITEMS} items {seed_kind}, found {}",
            seeds.len()
        )));
    }

    let candidates: Vec<&Item> =
        catalog.iter().filter(|item| !answered.contains(&item.id)).collect();
    if candidates.is_empty() {
        return Err(EngineError::below_threshold(format!(
            "learner {learner_id} has already answered every item"
        )));
    }

    // Unfiltered on items: the candidate list spans the whole unanswered catalog.
    let records = store.fetch_responses_for(None, None)?;
    let matrix = ResponseMatrix::from_records(&records);
    debug!(
        learner = %learner_id,
        seeds = seeds.len(),
        candidates = candidates.len(),
        records = records.len(),
        "item similarity inputs loaded"
    );

    let mut similar: Vec<(&Item, f64)> = candidates
        .into_iter()
        .map(|item| {
            let best = seeds
                .iter()
                .map(|seed| matrix.item_similarity(*seed, item.id, signal))
                .fold(0.0_f64, f64::max);
            (item, best)
        })
        .filter(|(_, best)| *best > SIMILARITY_FLOOR)
        .collect();
    if similar.is_empty() {
        return Err(EngineError::below_threshold(format!(
            "no unanswered item resembles the items learner {learner_id} {seed_kind}"
        )));
    }

    similar.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.id.cmp(&right.0.id)));
    similar.truncate(SIMILAR_ITEM_POOL);
    let similar_items_found = similar.len();

    let mut formatter = ItemFormatter::new(catalog, None);
    for (item, best) in similar.iter().take(QUIZ_LENGTH) {
        let detail = SimilarityDetail { max_similarity: round_to(*best, 3), seed_count: seeds.len() };
        formatter.push(item, Some(CandidateDetail::Similarity(detail)), rng);
    }

    let message = format!(
        "{} items selected from {similar_items_found} resembling {} items {seed_kind}",
        similar_items_found.min(QUIZ_LENGTH),
        seeds.len()
    );
    let summary = StrategySummary::Similarity(SimilaritySummary {
        seed_items: seeds.len(),
        similar_items_found,
    });
    Ok(formatter.finish(message, Some(summary)))
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{expect_error, expect_selection, item, run, FakeStore};
    use super::super::{StrategyInput, StrategyName};
    use crate::outcome::{CandidateDetail, StrategySummary};
    use crate::{DataShortfall, EngineError, ItemId, LearnerId};

    /// Learner 1 missed items 1 and 2. Item 5 is missed by the same peers that miss
    /// item 1; item 6 follows the opposite pattern.
    fn community() -> FakeStore {
        let mut store = FakeStore::with_items(8, 1);
        store.answer(1, 1, false, 0);
        store.answer(1, 2, false, 1);
        store.answer(1, 3, true, 2);
        let peers = [(2, false), (3, true), (4, false), (5, true)];
        for (peer, correct) in peers {
            store.answer(peer, 1, correct, 10);
            store.answer(peer, 2, correct, 11);
            store.answer(peer, 5, correct, 12);
            store.answer(peer, 6, !correct, 13);
        }
        store
    }

    #[test]
    fn positive_variant_finds_items_missed_alongside_the_seeds() {
        let mut store = community();
        let input = StrategyInput::for_learner(LearnerId(1));
        let selection =
            expect_selection(run(&mut store, StrategyName::ItemSimilarityPositive, &input, 1));

        let ids: Vec<ItemId> = selection.items.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![ItemId(5)]);
        match &selection.items[0].detail {
            Some(CandidateDetail::Similarity(detail)) => {
                assert!((detail.max_similarity - 1.0).abs() < f64::EPSILON);
                assert_eq!(detail.seed_count, 2);
            }
            other => panic!("unexpected detail: {other:?}"),
        }
        match &selection.summary {
            Some(StrategySummary::Similarity(summary)) => {
                assert_eq!(summary.seed_items, 2);
                assert_eq!(summary.similar_items_found, 1);
            }
            other => panic!("unexpected summary: {other:?}"),
        }
    }

    #[test]
    fn single_seed_is_below_threshold() {
        let mut store = community();
        let input = StrategyInput::for_learner(LearnerId(1));
        let err = expect_error(run(&mut store, StrategyName::ItemSimilarityNegative, &input, 1));
        assert!(matches!(
            err,
            EngineError::InsufficientData { shortfall: DataShortfall::BelowThreshold, .. }
        ));
    }

    #[test]
    fn learner_without_seeds_is_no_data() {
        let mut store = community();
        let input = StrategyInput::for_learner(LearnerId(42));
        let err = expect_error(run(&mut store, StrategyName::ItemSimilarityPositive, &input, 1));
        assert!(matches!(err, EngineError::InsufficientData { shortfall: DataShortfall::NoData, .. }));
    }

    #[test]
    fn large_catalogs_are_read_without_an_item_filter() {
        let mut store = community();
        store.items = (1..=500).map(|id| item(id, 1)).collect();
        store.max_filter_items = Some(64);
        let input = StrategyInput::for_learner(LearnerId(1));
        let selection =
            expect_selection(run(&mut store, StrategyName::ItemSimilarityPositive, &input, 1));

        let ids: Vec<ItemId> = selection.items.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![ItemId(5)]);
    }

    #[test]
    fn unrelated_candidates_are_filtered_by_the_floor() {
        let mut store = FakeStore::with_items(6, 1);
        store.answer(1, 1, false, 0);
        store.answer(1, 2, false, 0);
        let input = StrategyInput::for_learner(LearnerId(1));
        let err = expect_error(run(&mut store, StrategyName::ItemSimilarityPositive, &input, 1));
        assert!(err.to_string().contains("no unanswered item resembles"));
    }
}
