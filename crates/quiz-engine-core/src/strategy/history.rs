use rand::Rng;
use tracing::debug;

use super::{catalog_index, tally_by_item, ItemFormatter, ItemTally, RunScope, Selection, StrategyName};
use crate::correlation::count_as_f64;
use crate::outcome::{CandidateDetail, HistoryDetail, HistorySummary, StrategySummary};
use crate::{
    round_to, sample_without_replacement, EngineError, Item, QuizStore, ResponseFilter,
    HISTORY_POOL, QUIZ_LENGTH, VOLUME_CAP, VOLUME_SCALE,
};

/// Sampling weight of an item: its event rate plus a capped bonus for event volume.
pub(crate) fn history_weight(rate: f64, events: u32) -> f64 {
    rate + (f64::from(events) / VOLUME_SCALE).min(VOLUME_CAP)
}

/// Weighted draw over the items the learner got right (or wrong) before.
pub(super) fn past_events<S, R>(
    scope: RunScope<'_, S, R>,
    name: StrategyName,
    events: ResponseFilter,
) -> Result<Selection, EngineError>
where
    S: QuizStore + ?Sized,
    R: Rng + ?Sized,
{
    let RunScope { store, rng, catalog, input, .. } = scope;
    let learner_id = input.require_learner(name)?;
    let history = store.fetch_learner_responses(learner_id, ResponseFilter::All)?;
    let index = catalog_index(catalog);

    let mut pool: Vec<(&Item, ItemTally)> = tally_by_item(&history, |record| events.admits(record.correct))
        .into_iter()
        .filter(|(_, tally)| tally.events > 0)
        .filter_map(|(item_id, tally)| index.get(&item_id).map(|item| (*item, tally)))
        .collect();

    let kind = match events {
        ResponseFilter::IncorrectOnly => "missed",
        _ => "correct",
    };
    if pool.is_empty() {
        return Err(EngineError::no_data(format!(
            "learner {learner_id} has no {kind} answers on record"
        )));
    }

    pool.sort_by(|left, right| {
        right
            .1
            .rate()
            .total_cmp(&left.1.rate())
            .then_with(|| right.1.events.cmp(&left.1.events))
            .then_with(|| left.1.last_answered_at.cmp(&right.1.last_answered_at))
            .then_with(|| left.0.id.cmp(&right.0.id))
    });
    pool.truncate(HISTORY_POOL);
    debug!(learner = %learner_id, pool = pool.len(), kind, "history pool ranked");

    let weights: Vec<f64> = pool.iter().map(|(_, tally)| history_weight(tally.rate(), tally.events)).collect();
    let chosen = sample_without_replacement(&pool, &weights, QUIZ_LENGTH, rng)?;

    let mut formatter = ItemFormatter::new(catalog, None);
    for (item, tally) in &chosen {
        let detail = HistoryDetail {
            rate: round_to(tally.rate(), 3),
            event_count: tally.events,
            attempts: tally.attempts,
            last_answered_at: tally.last_answered_at,
        };
        formatter.push(item, Some(CandidateDetail::History(detail)), rng);
    }

    let mean_rate = if chosen.is_empty() {
        0.0
    } else {
        chosen.iter().map(|(_, tally)| tally.rate()).sum::<f64>() / count_as_f64(chosen.len())
    };
    let selected_event_count: u32 = chosen.iter().map(|(_, tally)| tally.events).sum();
    let message = format!(
        "{} of {} previously {kind} items selected by rate and volume",
        chosen.len(),
        pool.len()
    );
    let summary = StrategySummary::History(HistorySummary {
        available_count: pool.len(),
        mean_rate: round_to(mean_rate, 2),
        selected_event_count,
    });
    Ok(formatter.finish(message, Some(summary)))
}
