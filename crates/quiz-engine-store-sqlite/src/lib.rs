use std::path::Path;

use anyhow::{anyhow, Context, Result};
use quiz_engine_core::{
    Category, CategoryAccuracy, CategoryId, Item, ItemId, LearnerId, QuizStore, ResponseFilter,
    ResponseId, ResponseRecord, StoreError,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use tracing::debug;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS categories (
  category_id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE CHECK (length(trim(name)) > 0),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
  item_id INTEGER PRIMARY KEY AUTOINCREMENT,
  media TEXT NOT NULL CHECK (length(trim(media)) > 0),
  correct_answer TEXT NOT NULL CHECK (length(trim(correct_answer)) > 0),
  category_id INTEGER NOT NULL REFERENCES categories(category_id),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS responses (
  response_id INTEGER PRIMARY KEY AUTOINCREMENT,
  learner_id INTEGER NOT NULL,
  item_id INTEGER NOT NULL REFERENCES items(item_id),
  correct INTEGER NOT NULL CHECK (correct IN (0, 1)),
  answered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_category ON items(category_id);
CREATE INDEX IF NOT EXISTS idx_responses_learner_item ON responses(learner_id, item_id);
CREATE INDEX IF NOT EXISTS idx_responses_item ON responses(item_id);
";

const RESPONSE_COLUMNS: &str = "response_id, learner_id, item_id, correct, answered_at";

pub struct SqliteStore {
    conn: Connection,
}

/// Serialized with snake_case keys, unlike the camelCase catalog types below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub media: String,
    pub correct_answer: String,
    pub category_id: CategoryId,
}

/// One answered item inside a submitted quiz.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResult {
    pub item_id: ItemId,
    pub correct: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LearnerTotals {
    pub attempts: u32,
    pub correct: u32,
}

impl SqliteStore {
    /// Open a SQLite-backed quiz store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than this build.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            self.apply_migration_1()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![1_i64, now_rfc3339()?],
        )
        .context("failed to record migration version 1")?;
        tx.commit().context("failed to commit migration v1")?;
        debug!(version = 1, "schema migration applied");
        Ok(())
    }

    /// # Errors
    /// Returns an error when the name is blank, already taken, or the insert fails.
    pub fn add_category(&mut self, name: &str) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("category name must not be empty"));
        }

        self.conn
            .execute(
                "INSERT INTO categories(name, created_at) VALUES (?1, ?2)",
                params![name, now_rfc3339()?],
            )
            .with_context(|| format!("failed to insert category `{name}`"))?;

        Ok(Category { id: CategoryId(self.conn.last_insert_rowid()), name: name.to_string() })
    }

    /// # Errors
    /// Returns an error when categories cannot be read.
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let mut stmt = self
            .conn
            .prepare("SELECT category_id, name FROM categories ORDER BY category_id ASC")
            .context("failed to prepare category listing")?;
        let categories = stmt
            .query_map([], |row| Ok(Category { id: CategoryId(row.get(0)?), name: row.get(1)? }))
            .context("failed to list categories")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode category row")?;
        Ok(categories)
    }

    /// # Errors
    /// Returns an error when a field is blank, the category does not exist, or the insert fails.
    pub fn add_item(&mut self, input: &NewItem) -> Result<Item> {
        let media = input.media.trim();
        let correct_answer = input.correct_answer.trim();
        if media.is_empty() {
            return Err(anyhow!("item media must not be empty"));
        }
        if correct_answer.is_empty() {
            return Err(anyhow!("item correct answer must not be empty"));
        }
        if !self.category_exists(input.category_id)? {
            return Err(anyhow!("unknown category {}", input.category_id));
        }

        self.conn
            .execute(
                "INSERT INTO items(media, correct_answer, category_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![media, correct_answer, input.category_id.0, now_rfc3339()?],
            )
            .context("failed to insert item")?;

        Ok(Item {
            id: ItemId(self.conn.last_insert_rowid()),
            media: media.to_string(),
            correct_answer: correct_answer.to_string(),
            category_id: input.category_id,
        })
    }

    /// Catalog items, optionally restricted to one category, in id order.
    ///
    /// # Errors
    /// Returns an error when items cannot be read.
    pub fn list_items(&self, category_id: Option<CategoryId>) -> Result<Vec<Item>> {
        let mut sql =
            String::from("SELECT item_id, media, correct_answer, category_id FROM items");
        if category_id.is_some() {
            sql.push_str(" WHERE category_id = ?1");
        }
        sql.push_str(" ORDER BY item_id ASC");

        let mut stmt = self.conn.prepare(&sql).context("failed to prepare item listing")?;
        let rows = match category_id {
            Some(category_id) => stmt.query_map(params![category_id.0], item_from_row),
            None => stmt.query_map([], item_from_row),
        }
        .context("failed to list items")?;
        let items =
            rows.collect::<rusqlite::Result<Vec<_>>>().context("failed to decode item row")?;
        Ok(items)
    }

    /// Append one response per answered item as a single transaction.
    ///
    /// An unknown item id rejects the whole submission.
    ///
    /// # Errors
    /// Returns an error when the submission is empty, references an unknown item, or any write fails.
    pub fn record_results(
        &mut self,
        learner_id: LearnerId,
        results: &[AnswerResult],
        answered_at: OffsetDateTime,
    ) -> Result<Vec<ResponseRecord>> {
        if results.is_empty() {
            return Err(anyhow!("a submission must contain at least one result"));
        }

        let answered_at = answered_at.to_offset(UtcOffset::UTC);
        let stamp = rfc3339(answered_at)?;
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let mut records = Vec::with_capacity(results.len());

        for result in results {
            let known: Option<i64> = tx
                .query_row(
                    "SELECT item_id FROM items WHERE item_id = ?1",
                    params![result.item_id.0],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to look up answered item")?;
            if known.is_none() {
                return Err(anyhow!("unknown item {}", result.item_id));
            }

            tx.execute(
                "INSERT INTO responses(learner_id, item_id, correct, answered_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![learner_id.0, result.item_id.0, result.correct, stamp],
            )
            .context("failed to insert response")?;

            records.push(ResponseRecord {
                id: ResponseId(tx.last_insert_rowid()),
                learner_id,
                item_id: result.item_id,
                correct: result.correct,
                answered_at,
            });
        }

        tx.commit().context("failed to commit response submission")?;
        debug!(learner = %learner_id, count = records.len(), "responses recorded");
        Ok(records)
    }

    /// # Errors
    /// Returns an error when the aggregate cannot be read.
    pub fn learner_totals(&self, learner_id: LearnerId) -> Result<LearnerTotals> {
        let (attempts, correct): (i64, i64) = self
            .conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(correct), 0) FROM responses WHERE learner_id = ?1",
                params![learner_id.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("failed to read learner totals")?;

        Ok(LearnerTotals { attempts: to_count(attempts)?, correct: to_count(correct)? })
    }

    fn category_exists(&self, category_id: CategoryId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT category_id FROM categories WHERE category_id = ?1",
                params![category_id.0],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up category")?;
        Ok(found.is_some())
    }

    fn query_responses(&self, sql: &str, values: &[i64]) -> Result<Vec<ResponseRecord>> {
        let mut stmt = self.conn.prepare(sql).context("failed to prepare response query")?;
        let mut rows = stmt.query(params_from_iter(values.iter())).context("failed to query responses")?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().context("failed to read response row")? {
            records.push(response_from_row(row)?);
        }
        Ok(records)
    }

    fn load_learner_responses(
        &self,
        learner_id: LearnerId,
        filter: ResponseFilter,
    ) -> Result<Vec<ResponseRecord>> {
        let clause = match filter {
            ResponseFilter::All => "",
            ResponseFilter::CorrectOnly => " AND correct = 1",
            ResponseFilter::IncorrectOnly => " AND correct = 0",
        };
        let sql = format!(
            "SELECT {RESPONSE_COLUMNS} FROM responses WHERE learner_id = ?1{clause} ORDER BY response_id ASC"
        );
        self.query_responses(&sql, &[learner_id.0])
    }

    fn load_responses_for(
        &self,
        learner_ids: Option<&[LearnerId]>,
        item_ids: Option<&[ItemId]>,
    ) -> Result<Vec<ResponseRecord>> {
        if learner_ids.is_some_and(<[LearnerId]>::is_empty)
            || item_ids.is_some_and(<[ItemId]>::is_empty)
        {
            return Ok(Vec::new());
        }

        let mut clauses = Vec::new();
        let mut values: Vec<i64> = Vec::new();
        if let Some(learner_ids) = learner_ids {
            clauses.push(format!("learner_id IN ({})", placeholders(values.len(), learner_ids.len())));
            values.extend(learner_ids.iter().map(|id| id.0));
        }
        if let Some(item_ids) = item_ids {
            clauses.push(format!("item_id IN ({})", placeholders(values.len(), item_ids.len())));
            values.extend(item_ids.iter().map(|id| id.0));
        }

        let mut sql = format!("SELECT {RESPONSE_COLUMNS} FROM responses");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY response_id ASC");
        self.query_responses(&sql, &values)
    }

    fn load_shared_respondents(&self, item_a: ItemId, item_b: ItemId) -> Result<Vec<LearnerId>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT a.learner_id
                 FROM responses a
                 JOIN responses b ON b.learner_id = a.learner_id
                 WHERE a.item_id = ?1 AND b.item_id = ?2
                 ORDER BY a.learner_id ASC",
            )
            .context("failed to prepare shared respondent query")?;
        let learners = stmt
            .query_map(params![item_a.0, item_b.0], |row| Ok(LearnerId(row.get(0)?)))
            .context("failed to query shared respondents")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to decode shared respondent row")?;
        Ok(learners)
    }

    fn load_category_accuracy(&self, learner_id: LearnerId) -> Result<Vec<CategoryAccuracy>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT i.category_id, COUNT(*), SUM(r.correct)
                 FROM responses r
                 JOIN items i ON i.item_id = r.item_id
                 WHERE r.learner_id = ?1
                 GROUP BY i.category_id
                 ORDER BY i.category_id ASC",
            )
            .context("failed to prepare category accuracy query")?;
        let mut rows = stmt.query(params![learner_id.0]).context("failed to query category accuracy")?;
        let mut accuracy = Vec::new();
        while let Some(row) = rows.next().context("failed to read category accuracy row")? {
            let attempts = to_count(row.get(1)?)?;
            let hits = to_count(row.get(2)?)?;
            accuracy.push(CategoryAccuracy {
                category_id: CategoryId(row.get(0)?),
                attempts,
                correct_rate: if attempts == 0 { 0.0 } else { f64::from(hits) / f64::from(attempts) },
            });
        }
        Ok(accuracy)
    }

    /// Rotate the latest record of each pair in one transaction.
    ///
    /// The latest record is the maximum `answered_at`, ties broken by the highest `response_id`.
    fn touch_latest(
        &mut self,
        learner_id: LearnerId,
        item_ids: &[ItemId],
        at: OffsetDateTime,
    ) -> Result<usize> {
        let stamp = rfc3339(at.to_offset(UtcOffset::UTC))?;
        let tx = self.conn.transaction().context("failed to start rotation transaction")?;
        let mut updated = 0;

        for item_id in item_ids {
            let mut latest: Option<ResponseRecord> = None;
            {
                let mut stmt = tx
                    .prepare(&format!(
                        "SELECT {RESPONSE_COLUMNS} FROM responses WHERE learner_id = ?1 AND item_id = ?2"
                    ))
                    .context("failed to prepare rotation lookup")?;
                let mut rows = stmt
                    .query(params![learner_id.0, item_id.0])
                    .context("failed to query rotation candidates")?;
                while let Some(row) = rows.next().context("failed to read rotation candidate")? {
                    let record = response_from_row(row)?;
                    if latest.as_ref().map_or(true, |current| record.is_newer_than(current)) {
                        latest = Some(record);
                    }
                }
            }

            if let Some(record) = latest {
                updated += tx
                    .execute(
                        "UPDATE responses SET answered_at = ?1 WHERE response_id = ?2",
                        params![stamp, record.id.0],
                    )
                    .context("failed to rotate response timestamp")?;
            }
        }

        tx.commit().context("failed to commit rotation")?;
        debug!(learner = %learner_id, updated, "stale responses rotated");
        Ok(updated)
    }
}

impl QuizStore for SqliteStore {
    fn fetch_all_items(&self) -> Result<Vec<Item>, StoreError> {
        self.list_items(None).map_err(|err| port_error("fetch_all_items", &err))
    }

    fn fetch_items_by_category(&self, category_id: CategoryId) -> Result<Vec<Item>, StoreError> {
        self.list_items(Some(category_id)).map_err(|err| port_error("fetch_items_by_category", &err))
    }

    fn fetch_learner_responses(
        &self,
        learner_id: LearnerId,
        filter: ResponseFilter,
    ) -> Result<Vec<ResponseRecord>, StoreError> {
        self.load_learner_responses(learner_id, filter)
            .map_err(|err| port_error("fetch_learner_responses", &err))
    }

    fn fetch_shared_respondents(
        &self,
        item_a: ItemId,
        item_b: ItemId,
    ) -> Result<Vec<LearnerId>, StoreError> {
        self.load_shared_respondents(item_a, item_b)
            .map_err(|err| port_error("fetch_shared_respondents", &err))
    }

    fn fetch_responses_for(
        &self,
        learner_ids: Option<&[LearnerId]>,
        item_ids: Option<&[ItemId]>,
    ) -> Result<Vec<ResponseRecord>, StoreError> {
        self.load_responses_for(learner_ids, item_ids)
            .map_err(|err| port_error("fetch_responses_for", &err))
    }

    fn fetch_category_accuracy(
        &self,
        learner_id: LearnerId,
    ) -> Result<Vec<CategoryAccuracy>, StoreError> {
        self.load_category_accuracy(learner_id)
            .map_err(|err| port_error("fetch_category_accuracy", &err))
    }

    fn touch_response_timestamps(
        &mut self,
        learner_id: LearnerId,
        item_ids: &[ItemId],
        at: OffsetDateTime,
    ) -> Result<usize, StoreError> {
        self.touch_latest(learner_id, item_ids, at)
            .map_err(|err| port_error("touch_response_timestamps", &err))
    }
}

fn port_error(operation: &'static str, err: &anyhow::Error) -> StoreError {
    StoreError::new(operation, format!("{err:#}"))
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: ItemId(row.get(0)?),
        media: row.get(1)?,
        correct_answer: row.get(2)?,
        category_id: CategoryId(row.get(3)?),
    })
}

fn response_from_row(row: &Row<'_>) -> Result<ResponseRecord> {
    Ok(ResponseRecord {
        id: ResponseId(row.get(0)?),
        learner_id: LearnerId(row.get(1)?),
        item_id: ItemId(row.get(2)?),
        correct: row.get(3)?,
        answered_at: parse_rfc3339(&row.get::<_, String>(4)?)?,
    })
}

/// `?N` placeholders numbered after the `offset` values already bound.
fn placeholders(offset: usize, count: usize) -> String {
    (offset + 1..=offset + count).map(|index| format!("?{index}")).collect::<Vec<_>>().join(", ")
}

fn to_count(value: i64) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("count out of range: {value}"))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
