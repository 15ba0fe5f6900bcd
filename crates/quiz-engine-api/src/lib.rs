use std::path::PathBuf;

use anyhow::{Context, Result};
use quiz_engine_core::{
    compare_items, round_to, run_strategy_by_name, Category, CategoryAccuracy, CategoryId, Item,
    ItemId, ItemPairSimilarity, LearnerId, QuizStore, RecommendationOutcome, ResponseRecord,
    RunContext, StrategyDescriptor, StrategyInput, StrategyName,
};
use quiz_engine_store_sqlite::SqliteStore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

pub use quiz_engine_store_sqlite::{AnswerResult, NewItem, SchemaStatus};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Schema administration keeps snake_case keys, like `SchemaStatus` and the CLI
/// `contract_version` field. Catalog, response and outcome payloads are camelCase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddCategoryRequest {
    pub name: String,
}

/// A submitted quiz: one result per answered item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordResultsRequest {
    pub learner_id: LearnerId,
    pub results: Vec<AnswerResult>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub answered_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordResultsResult {
    pub learner_id: LearnerId,
    pub recorded: usize,
    pub responses: Vec<ResponseRecord>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearnerStats {
    pub learner_id: LearnerId,
    pub attempts: u32,
    pub correct: u32,
    /// Fraction of correct responses, 4 decimals; 0 without responses.
    pub correct_rate: f64,
    pub categories: Vec<CategoryAccuracy>,
}

#[derive(Debug, Clone)]
pub struct QuizEngineApi {
    db_path: PathBuf,
    seed: Option<u64>,
}

impl QuizEngineApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path, seed: None }
    }

    /// Fix the RNG seed so repeated runs over the same data select the same items.
    #[must_use]
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    #[must_use]
    pub fn list_strategies(&self) -> Vec<StrategyDescriptor> {
        StrategyName::ALL.iter().map(|name| name.descriptor()).collect()
    }

    /// Run one named strategy against the current data.
    ///
    /// Selection failures (unknown name, missing input, too little data) come back as an
    /// outcome with `status = "error"`; only database setup failures are returned as `Err`.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn run_strategy(&self, name: &str, input: StrategyInput) -> Result<RecommendationOutcome> {
        self.run_strategy_at(name, input, OffsetDateTime::now_utc())
    }

    /// Same as [`Self::run_strategy`] with an explicit clock.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn run_strategy_at(
        &self,
        name: &str,
        input: StrategyInput,
        now: OffsetDateTime,
    ) -> Result<RecommendationOutcome> {
        let mut store = self.open_migrated_store()?;
        let mut rng = self.rng();
        let context = RunContext::new(now);
        debug!(run_id = %context.run_id, strategy = name, seeded = self.seed.is_some(), "running strategy");
        Ok(run_strategy_by_name(&mut store, name, &input, &mut rng, context))
    }

    /// # Errors
    /// Returns an error when the name is invalid or already used, or persistence fails.
    pub fn add_category(&self, input: AddCategoryRequest) -> Result<Category> {
        let mut store = self.open_migrated_store()?;
        store.add_category(&input.name)
    }

    /// # Errors
    /// Returns an error when categories cannot be read.
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let store = self.open_migrated_store()?;
        store.list_categories()
    }

    /// # Errors
    /// Returns an error when the item is invalid, its category is unknown, or persistence fails.
    pub fn add_item(&self, input: NewItem) -> Result<Item> {
        let mut store = self.open_migrated_store()?;
        store.add_item(&input)
    }

    /// # Errors
    /// Returns an error when items cannot be read.
    pub fn list_items(&self, category_id: Option<CategoryId>) -> Result<Vec<Item>> {
        let store = self.open_migrated_store()?;
        store.list_items(category_id)
    }

    /// Store a submitted quiz; `answered_at` defaults to now.
    ///
    /// # Errors
    /// Returns an error when the submission is empty, names an unknown item, or persistence fails.
    pub fn record_results(&self, input: RecordResultsRequest) -> Result<RecordResultsResult> {
        let mut store = self.open_migrated_store()?;
        let answered_at = input.answered_at.unwrap_or_else(OffsetDateTime::now_utc);
        let responses = store.record_results(input.learner_id, &input.results, answered_at)?;
        Ok(RecordResultsResult {
            learner_id: input.learner_id,
            recorded: responses.len(),
            responses,
        })
    }

    /// # Errors
    /// Returns an error when the learner's responses cannot be aggregated.
    pub fn learner_stats(&self, learner_id: LearnerId) -> Result<LearnerStats> {
        let store = self.open_migrated_store()?;
        let totals = store.learner_totals(learner_id)?;
        let categories = store
            .fetch_category_accuracy(learner_id)
            .context("failed to load category accuracy")?;
        let correct_rate = if totals.attempts == 0 {
            0.0
        } else {
            round_to(f64::from(totals.correct) / f64::from(totals.attempts), 4)
        };

        Ok(LearnerStats {
            learner_id,
            attempts: totals.attempts,
            correct: totals.correct,
            correct_rate,
            categories,
        })
    }

    /// Similarity of two items over their shared respondents.
    ///
    /// # Errors
    /// Returns an error when both ids name the same item or the responses cannot be read.
    pub fn item_similarity(&self, item_a: ItemId, item_b: ItemId) -> Result<ItemPairSimilarity> {
        let store = self.open_migrated_store()?;
        let similarity = compare_items(&store, item_a, item_b)?;
        Ok(similarity)
    }
}
