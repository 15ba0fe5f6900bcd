//! Entry point the surrounding layers call: validate, gate, dispatch, wrap.

use rand::Rng;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};
use ulid::Ulid;

use crate::strategy::RunScope;
use crate::{
    round_to, EngineError, ItemId, QuizStore, RecommendationOutcome, ResponseMatrix, Signal,
    StrategyInput, StrategyName, MIN_CATALOG_ITEMS,
};

/// Per-invocation identity and clock.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RunContext {
    pub run_id: Ulid,
    pub now: OffsetDateTime,
}

impl RunContext {
    #[must_use]
    pub fn new(now: OffsetDateTime) -> Self {
        Self { run_id: Ulid::new(), now }
    }
}

/// Run one named strategy and wrap the result in an outcome.
///
/// Never fails: every error becomes a `status = "error"` outcome.
pub fn run_strategy<S, R>(
    store: &mut S,
    name: StrategyName,
    input: &StrategyInput,
    rng: &mut R,
    context: RunContext,
) -> RecommendationOutcome
where
    S: QuizStore + ?Sized,
    R: Rng + ?Sized,
{
    match execute(store, name, input, rng, context.now) {
        Ok(selection) => {
            info!(
                run_id = %context.run_id,
                strategy = name.as_str(),
                item_count = selection.items.len(),
                "strategy completed"
            );
            for note in &selection.degradations {
                warn!(run_id = %context.run_id, strategy = name.as_str(), note = %note, "strategy degraded");
            }
            RecommendationOutcome::completed(
                context.run_id,
                name.as_str(),
                selection.items,
                selection.message,
                selection.summary,
                selection.degradations,
            )
        }
        Err(err) => {
            warn!(run_id = %context.run_id, strategy = name.as_str(), error = %err, "strategy failed");
            RecommendationOutcome::failed(context.run_id, name.as_str(), &err)
        }
    }
}

/// Same as [`run_strategy`], resolving the strategy from its registry name.
pub fn run_strategy_by_name<S, R>(
    store: &mut S,
    name: &str,
    input: &StrategyInput,
    rng: &mut R,
    context: RunContext,
) -> RecommendationOutcome
where
    S: QuizStore + ?Sized,
    R: Rng + ?Sized,
{
    match StrategyName::parse(name) {
        Some(strategy) => run_strategy(store, strategy, input, rng, context),
        None => {
            let err = EngineError::Validation(format!("unknown strategy `{name}`"));
            warn!(run_id = %context.run_id, strategy = name, error = %err, "strategy rejected");
            RecommendationOutcome::failed(context.run_id, name, &err)
        }
    }
}

fn execute<S, R>(
    store: &mut S,
    name: StrategyName,
    input: &StrategyInput,
    rng: &mut R,
    now: OffsetDateTime,
) -> Result<crate::strategy::Selection, EngineError>
where
    S: QuizStore + ?Sized,
    R: Rng + ?Sized,
{
    name.validate(input)?;

    let catalog = store.fetch_all_items()?;
    if catalog.is_empty() {
        return Err(EngineError::no_data("the item catalog is empty"));
    }
    if catalog.len() < MIN_CATALOG_ITEMS {
        return Err(EngineError::below_threshold(format!(
            "the item catalog holds {} items; at least {MIN_CATALOG_ITEMS} are needed",
            catalog.len()
        )));
    }

    name.execute(RunScope { store, rng, catalog: &catalog, input, now })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemPairSimilarity {
    pub item_a: ItemId,
    pub item_b: ItemId,
    pub shared_respondents: usize,
    pub correctness_similarity: f64,
    pub failure_similarity: f64,
}

/// Similarity of two items over the learners who answered both.
///
/// # Errors
/// Returns [`EngineError::Validation`] when both ids are the same item, and
/// [`EngineError::StoreAccess`] when either read fails.
pub fn compare_items<S>(
    store: &S,
    item_a: ItemId,
    item_b: ItemId,
) -> Result<ItemPairSimilarity, EngineError>
where
    S: QuizStore + ?Sized,
{
    if item_a == item_b {
        return Err(EngineError::Validation(format!(
            "item {item_a} cannot be compared with itself"
        )));
    }

    let shared = store.fetch_shared_respondents(item_a, item_b)?;
    let records = store.fetch_responses_for(Some(shared.as_slice()), Some([item_a, item_b].as_slice()))?;
    let matrix = ResponseMatrix::from_records(&records);

    Ok(ItemPairSimilarity {
        item_a,
        item_b,
        shared_respondents: shared.len(),
        correctness_similarity: round_to(
            matrix.item_similarity(item_a, item_b, Signal::Correctness),
            4,
        ),
        failure_similarity: round_to(matrix.item_similarity(item_a, item_b, Signal::Failure), 4),
    })
}
