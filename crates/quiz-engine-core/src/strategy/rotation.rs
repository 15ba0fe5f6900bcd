use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::{ItemFormatter, RunScope, Selection, StrategyName};
use crate::outcome::{
    CandidateDetail, ItemSource, RotationDetail, RotationSummary, SelectionKind, StrategySummary,
};
use crate::{EngineError, Item, ItemId, QuizStore, ResponseFilter, QUIZ_LENGTH};

/// Never-answered items first, then the oldest-answered ones, which are rotated to `now`.
pub(super) fn unseen_or_stale<S, R>(
    scope: RunScope<'_, S, R>,
    name: StrategyName,
) -> Result<Selection, EngineError>
where
    S: QuizStore + ?Sized,
    R: Rng + ?Sized,
{
    let RunScope { store, rng, catalog, input, now } = scope;
    let learner_id = input.require_learner(name)?;
    let history = store.fetch_learner_responses(learner_id, ResponseFilter::All)?;

    let mut last_answered: BTreeMap<ItemId, OffsetDateTime> = BTreeMap::new();
    for record in &history {
        last_answered
            .entry(record.item_id)
            .and_modify(|latest| *latest = (*latest).max(record.answered_at))
            .or_insert(record.answered_at);
    }

    let mut unseen: Vec<&Item> =
        catalog.iter().filter(|item| !last_answered.contains_key(&item.id)).collect();
    unseen.shuffle(rng);
    unseen.truncate(QUIZ_LENGTH);

    let mut stale: Vec<(&Item, OffsetDateTime)> = catalog
        .iter()
        .filter_map(|item| last_answered.get(&item.id).map(|at| (item, *at)))
        .collect();
    stale.sort_by(|left, right| left.1.cmp(&right.1).then_with(|| left.0.id.cmp(&right.0.id)));
    stale.truncate(QUIZ_LENGTH - unseen.len());
    debug!(learner = %learner_id, unseen = unseen.len(), stale = stale.len(), "rotation pool built");

    let mut degradations = Vec::new();
    let mut rotated_count = 0;
    if !stale.is_empty() {
        let stale_ids: Vec<ItemId> = stale.iter().map(|(item, _)| item.id).collect();
        match store.touch_response_timestamps(learner_id, &stale_ids, now) {
            Ok(updated) => rotated_count = updated,
            Err(err) => {
                warn!(learner = %learner_id, error = %err, "stale item rotation was not recorded");
                degradations.push(format!("stale items were selected but not rotated: {err}"));
            }
        }
    }

    let mut formatter = ItemFormatter::new(catalog, None);
    for item in &unseen {
        let detail = RotationDetail { source: ItemSource::Unseen, last_answered_at: None };
        formatter.push(item, Some(CandidateDetail::Rotation(detail)), rng);
    }
    for (item, answered_at) in &stale {
        let detail = RotationDetail { source: ItemSource::Stale, last_answered_at: Some(*answered_at) };
        formatter.push(item, Some(CandidateDetail::Rotation(detail)), rng);
    }

    let selection_kind = match (unseen.is_empty(), stale.is_empty()) {
        (false, true) => SelectionKind::Unseen,
        (true, false) => SelectionKind::Stale,
        _ => SelectionKind::Mixed,
    };
    let message = format!(
        "{} never-answered and {} least-recently-answered items selected",
        unseen.len(),
        stale.len()
    );
    let summary = StrategySummary::Rotation(RotationSummary {
        selection_kind,
        unseen_count: unseen.len(),
        stale_count: stale.len(),
        rotated_count,
    });
    let mut selection = formatter.finish(message, Some(summary));
    selection.degradations.extend(degradations);
    Ok(selection)
}
