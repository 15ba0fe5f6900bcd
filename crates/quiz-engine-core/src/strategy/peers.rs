use std::collections::BTreeSet;

use rand::Rng;
use tracing::debug;

use super::{
    answered_items, catalog_index, tally_by_item, ItemFormatter, ItemTally, RunScope, Selection,
    StrategyName,
};
use crate::outcome::{CandidateDetail, PeerDetail, PeerSummary, StrategySummary};
use crate::{
    round_to, EngineError, Item, ItemId, LearnerId, QuizStore, ResponseFilter, ResponseMatrix,
    Signal, MIN_SHARED_ITEMS, PEER_MIN_ATTEMPTS, PEER_MIN_RATE, QUIZ_LENGTH,
    SIMILAR_LEARNER_LIMIT,
};

/// Unanswered items that the learner's closest peers tend to miss (or get right).
pub(super) fn similar_learners<S, R>(
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
    let own_history = store.fetch_learner_responses(learner_id, ResponseFilter::All)?;
    let answered = answered_items(&own_history);
    if answered.is_empty() {
        return Err(EngineError::no_data(format!("learner {learner_id} has no responses yet")));
    }
    if answered.len() < MIN_SHARED_ITEMS {
        return Err(EngineError::below_threshold(format!(
            "learner {learner_id} has answered {} items; at least {MIN_SHARED_ITEMS} are needed",
            answered.len()
        )));
    }

    let overlap = store.fetch_responses_for(None, Some(answered.as_slice()))?;
    let matrix = ResponseMatrix::from_records(&overlap);
    let peers = rank_peers(&matrix, learner_id, signal);
    if peers.is_empty() {
        return Err(EngineError::below_threshold(format!(
            "no learner shares {MIN_SHARED_ITEMS} answered items with learner {learner_id} and a positive similarity"
        )));
    }
    let peer_ids: Vec<LearnerId> = peers.iter().map(|(peer, _)| *peer).collect();
    debug!(learner = %learner_id, peers = peer_ids.len(), signal = signal.as_str(), "similar learners ranked");

    let peer_history = store.fetch_responses_for(Some(peer_ids.as_slice()), None)?;
    let answered: BTreeSet<ItemId> = answered.into_iter().collect();
    let index = catalog_index(catalog);
    let mut candidates: Vec<(&Item, ItemTally)> =
        tally_by_item(peer_history.iter().filter(|record| !answered.contains(&record.item_id)), |record| {
            signal.encode(record.correct) == 1
        })
        .into_iter()
        .filter(|(_, tally)| tally.attempts >= PEER_MIN_ATTEMPTS && tally.rate() >= PEER_MIN_RATE)
        .filter_map(|(item_id, tally)| index.get(&item_id).map(|item| (*item, tally)))
        .collect();
    if candidates.is_empty() {
        return Err(EngineError::below_threshold(
            "similar learners share no qualifying unanswered items",
        ));
    }

    candidates.sort_by(|left, right| {
        right
            .1
            .rate()
            .total_cmp(&left.1.rate())
            .then_with(|| right.1.events.cmp(&left.1.events))
            .then_with(|| left.0.id.cmp(&right.0.id))
    });
    candidates.truncate(QUIZ_LENGTH);

    let mut formatter = ItemFormatter::new(catalog, None);
    for (item, tally) in &candidates {
        let detail = PeerDetail { peer_rate: round_to(tally.rate(), 3), peer_attempts: tally.attempts };
        formatter.push(item, Some(CandidateDetail::Peer(detail)), rng);
    }

    let message = format!(
        "{} items recommended from {} similar learners",
        candidates.len(),
        peer_ids.len()
    );
    let summary = StrategySummary::Peer(PeerSummary { similar_learners: peer_ids });
    Ok(formatter.finish(message, Some(summary)))
}

/// Peers sharing enough items with a positive similarity, most similar first (ties: lower id).
fn rank_peers(matrix: &ResponseMatrix, learner_id: LearnerId, signal: Signal) -> Vec<(LearnerId, f64)> {
    let mut peers: Vec<(LearnerId, f64)> = matrix
        .learners()
        .filter(|peer| *peer != learner_id)
        .filter(|peer| matrix.shared_item_count(learner_id, *peer) >= MIN_SHARED_ITEMS)
        .map(|peer| (peer, matrix.learner_similarity(learner_id, peer, signal)))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    peers.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
    peers.truncate(SIMILAR_LEARNER_LIMIT);
    peers
}
