use std::collections::BTreeMap;

use time::{Duration, OffsetDateTime};

use crate::{
    CategoryAccuracy, CategoryId, Item, ItemId, LearnerId, QuizStore, ResponseFilter,
    ResponseId, ResponseRecord, StoreError,
};

pub(crate) fn at(seconds: i64) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000 + seconds)
}

pub(crate) fn item(id: i64, category: i64) -> Item {
    Item {
        id: ItemId(id),
        media: format!("media/{id}.mp3"),
        correct_answer: format!("answer-{id}"),
        category_id: CategoryId(category),
    }
}

pub(crate) fn response(
    id: i64,
    learner: i64,
    item: i64,
    correct: bool,
    seconds: i64,
) -> ResponseRecord {
    ResponseRecord {
        id: ResponseId(id),
        learner_id: LearnerId(learner),
        item_id: ItemId(item),
        correct,
        answered_at: at(seconds),
    }
}

/// In-memory port used by strategy and orchestrator tests.
#[derive(Debug, Default)]
pub(crate) struct FakeStore {
    pub items: Vec<Item>,
    pub responses: Vec<ResponseRecord>,
    pub fail_catalog: bool,
    pub fail_touch: bool,
    /// Rejects item filters longer than this, the way SQLite caps bound parameters.
    pub max_filter_items: Option<usize>,
    pub touches: Vec<(LearnerId, Vec<ItemId>, OffsetDateTime)>,
}

impl FakeStore {
    pub fn with_items(count: i64, category: i64) -> Self {
        Self { items: (1..=count).map(|id| item(id, category)).collect(), ..Self::default() }
    }

    pub fn answer(&mut self, learner: i64, item: i64, correct: bool, seconds: i64) {
        let id = i64::try_from(self.responses.len()).unwrap_or(i64::MAX) + 1;
        self.responses.push(response(id, learner, item, correct, seconds));
    }
}

impl QuizStore for FakeStore {
    fn fetch_all_items(&self) -> Result<Vec<Item>, StoreError> {
        if self.fail_catalog {
            return Err(StoreError::new("fetch_all_items", "connection refused"));
        }
        Ok(self.items.clone())
    }

    fn fetch_items_by_category(&self, category_id: CategoryId) -> Result<Vec<Item>, StoreError> {
        Ok(self.items.iter().filter(|item| item.category_id == category_id).cloned().collect())
    }

    fn fetch_learner_responses(
        &self,
        learner_id: LearnerId,
        filter: ResponseFilter,
    ) -> Result<Vec<ResponseRecord>, StoreError> {
        Ok(self
            .responses
            .iter()
            .filter(|record| record.learner_id == learner_id && filter.admits(record.correct))
            .cloned()
            .collect())
    }

    fn fetch_shared_respondents(
        &self,
        item_a: ItemId,
        item_b: ItemId,
    ) -> Result<Vec<LearnerId>, StoreError> {
        let answered = |item_id: ItemId| -> Vec<LearnerId> {
            self.responses
                .iter()
                .filter(|record| record.item_id == item_id)
                .map(|record| record.learner_id)
                .collect()
        };
        let left = answered(item_a);
        let mut shared: Vec<LearnerId> =
            answered(item_b).into_iter().filter(|learner| left.contains(learner)).collect();
        shared.sort_unstable();
        shared.dedup();
        Ok(shared)
    }

    fn fetch_responses_for(
        &self,
        learner_ids: Option<&[LearnerId]>,
        item_ids: Option<&[ItemId]>,
    ) -> Result<Vec<ResponseRecord>, StoreError> {
        if let (Some(limit), Some(ids)) = (self.max_filter_items, item_ids) {
            if ids.len() > limit {
                return Err(StoreError::new("fetch_responses_for", "too many SQL variables"));
            }
        }
        Ok(self
            .responses
            .iter()
            .filter(|record| learner_ids.map_or(true, |ids| ids.contains(&record.learner_id)))
            .filter(|record| item_ids.map_or(true, |ids| ids.contains(&record.item_id)))
            .cloned()
            .collect())
    }

    fn fetch_category_accuracy(
        &self,
        learner_id: LearnerId,
    ) -> Result<Vec<CategoryAccuracy>, StoreError> {
        let categories: BTreeMap<ItemId, CategoryId> =
            self.items.iter().map(|item| (item.id, item.category_id)).collect();
        let mut counts: BTreeMap<CategoryId, (u32, u32)> = BTreeMap::new();
        for record in self.responses.iter().filter(|record| record.learner_id == learner_id) {
            if let Some(category_id) = categories.get(&record.item_id) {
                let entry = counts.entry(*category_id).or_default();
                entry.0 += 1;
                entry.1 += u32::from(record.correct);
            }
        }
        Ok(counts
            .into_iter()
            .map(|(category_id, (attempts, hits))| CategoryAccuracy {
                category_id,
                attempts,
                correct_rate: f64::from(hits) / f64::from(attempts),
            })
            .collect())
    }

    fn touch_response_timestamps(
        &mut self,
        learner_id: LearnerId,
        item_ids: &[ItemId],
        at: OffsetDateTime,
    ) -> Result<usize, StoreError> {
        if self.fail_touch {
            return Err(StoreError::new("touch_response_timestamps", "database is locked"));
        }
        let mut updated = 0;
        for item_id in item_ids {
            let latest = self
                .responses
                .iter()
                .enumerate()
                .filter(|(_, record)| record.learner_id == learner_id && record.item_id == *item_id)
                .max_by_key(|(_, record)| (record.answered_at, record.id))
                .map(|(index, _)| index);
            if let Some(index) = latest {
                self.responses[index].answered_at = at;
                updated += 1;
            }
        }
        self.touches.push((learner_id, item_ids.to_vec(), at));
        Ok(updated)
    }
}

/// Run one strategy directly against `store`, with the catalog loaded the way the orchestrator does.
pub(crate) fn run(
    store: &mut FakeStore,
    name: super::StrategyName,
    input: &super::StrategyInput,
    seed: u64,
) -> Result<super::Selection, crate::EngineError> {
    use rand::SeedableRng;

    let catalog = store.fetch_all_items()?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    name.execute(super::RunScope {
        store,
        rng: &mut rng,
        catalog: &catalog,
        input,
        now: at(1_000_000),
    })
}

pub(crate) fn expect_selection(
    result: Result<super::Selection, crate::EngineError>,
) -> super::Selection {
    match result {
        Ok(selection) => selection,
        Err(err) => panic!("strategy should succeed: {err}"),
    }
}

pub(crate) fn expect_error(result: Result<super::Selection, crate::EngineError>) -> crate::EngineError {
    match result {
        Ok(selection) => panic!("strategy should fail, got {} items", selection.items.len()),
        Err(err) => err,
    }
}
