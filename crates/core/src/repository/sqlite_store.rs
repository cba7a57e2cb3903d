//! SQLite-backed mention repository.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::store::{
    BrandMentionStats, BrandReport, CheckFilter, CheckOverview, MentionRepository,
    ModelMentionStats, ModelReport, ProjectReport, RepositoryError, StatusUpdate, TemplateFilter,
};
use crate::detection::{
    DetectionCheck, DetectionSummary, ModelError, ModelResult,
};
use crate::gateway::TokenUsage;
use crate::matcher::BrandMention;
use crate::templates::PromptTemplate;

/// SQLite-backed repository.
///
/// All statements run on the blocking pool against a single connection.
pub struct SqliteMentionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMentionRepository {
    /// Open (or create) a database file and its tables.
    pub fn new(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RepositoryError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS detection_checks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                prompt TEXT NOT NULL,
                brands TEXT NOT NULL,
                models TEXT NOT NULL,
                temperature REAL NOT NULL,
                max_tokens INTEGER NOT NULL,
                execution_mode TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL,
                total_mentions INTEGER,
                brands_mentioned TEXT,
                mention_rate REAL,
                avg_confidence REAL,
                successful_models INTEGER,
                failed_models INTEGER,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_checks_project_created
                ON detection_checks(project_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS model_results (
                id TEXT PRIMARY KEY,
                check_id TEXT NOT NULL REFERENCES detection_checks(id) ON DELETE CASCADE,
                model TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                response_text TEXT NOT NULL,
                latency_ms INTEGER NOT NULL,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER,
                error_kind TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(check_id, model)
            );

            CREATE TABLE IF NOT EXISTS brand_mentions (
                id TEXT PRIMARY KEY,
                check_id TEXT NOT NULL,
                result_id TEXT NOT NULL REFERENCES model_results(id) ON DELETE CASCADE,
                brand TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                mentioned INTEGER NOT NULL,
                confidence REAL NOT NULL,
                positions TEXT NOT NULL,
                contexts TEXT NOT NULL,
                method TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(result_id, brand)
            );

            CREATE INDEX IF NOT EXISTS idx_mentions_brand ON brand_mentions(brand);

            CREATE TABLE IF NOT EXISTS prompt_templates (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                category TEXT,
                template TEXT NOT NULL,
                variables TEXT NOT NULL DEFAULT '[]',
                description TEXT,
                usage_count INTEGER NOT NULL DEFAULT 0,
                is_public INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_templates_user ON prompt_templates(user_id);
            "#,
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| RepositoryError::Database(format!("connection lock poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RepositoryError::Database(format!("blocking task failed: {}", e)))?
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Serialization(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_field<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, RepositoryError> {
    s.parse().map_err(RepositoryError::Serialization)
}

/// Stable id from its parts, so retried writes hit the same row.
fn derive_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    let hex = format!("{:x}", hasher.finalize());
    hex[..32].to_string()
}

fn window_start(window_days: u32) -> String {
    ts(&(Utc::now() - Duration::days(window_days as i64)))
}

fn rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

// =============================================================================
// Checks
// =============================================================================

fn insert_check(conn: &Connection, check: &DetectionCheck) -> Result<(), RepositoryError> {
    conn.execute(
        "INSERT INTO detection_checks (id, project_id, user_id, prompt, brands, models, temperature, max_tokens, execution_mode, metadata, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT(id) DO NOTHING",
        params![
            check.id,
            check.project_id,
            check.user_id,
            check.prompt,
            serde_json::to_string(&check.brands)?,
            serde_json::to_string(&check.models)?,
            check.temperature as f64,
            check.max_tokens,
            check.execution_mode.as_str(),
            serde_json::to_string(&check.metadata)?,
            check.status.as_str(),
            ts(&check.created_at),
        ],
    )?;
    Ok(())
}

fn apply_status(conn: &Connection, check_id: &str, update: &StatusUpdate) -> Result<bool, RepositoryError> {
    let accepted = update.status.accepted_from();
    let placeholders = vec!["?"; accepted.len()].join(", ");
    let sql = format!(
        "UPDATE detection_checks SET status = ?, completed_at = COALESCE(?, completed_at), \
         total_mentions = COALESCE(?, total_mentions), brands_mentioned = COALESCE(?, brands_mentioned), \
         mention_rate = COALESCE(?, mention_rate), avg_confidence = COALESCE(?, avg_confidence), \
         successful_models = COALESCE(?, successful_models), failed_models = COALESCE(?, failed_models) \
         WHERE id = ? AND status IN ({})",
        placeholders
    );

    let summary = update.summary.as_ref();
    let brands_mentioned = summary
        .map(|s| serde_json::to_string(&s.brands_mentioned))
        .transpose()?;

    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(update.status.as_str()),
        Box::new(update.completed_at.as_ref().map(ts)),
        Box::new(summary.map(|s| s.total_mentions as i64)),
        Box::new(brands_mentioned),
        Box::new(summary.map(|s| s.mention_rate)),
        Box::new(summary.map(|s| s.avg_confidence)),
        Box::new(summary.map(|s| s.successful_models as i64)),
        Box::new(summary.map(|s| s.failed_models as i64)),
        Box::new(check_id.to_string()),
    ];
    for status in accepted {
        values.push(Box::new(status.as_str()));
    }
    let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();

    let changed = conn.execute(&sql, refs.as_slice())?;
    Ok(changed > 0)
}

const CHECK_COLUMNS: &str = "id, project_id, user_id, prompt, brands, models, temperature, max_tokens, \
     execution_mode, metadata, status, total_mentions, brands_mentioned, mention_rate, avg_confidence, \
     successful_models, failed_models, created_at, completed_at";

struct CheckRow {
    id: String,
    project_id: String,
    user_id: String,
    prompt: String,
    brands: String,
    models: String,
    temperature: f64,
    max_tokens: u32,
    execution_mode: String,
    metadata: String,
    status: String,
    total_mentions: Option<i64>,
    brands_mentioned: Option<String>,
    mention_rate: Option<f64>,
    avg_confidence: Option<f64>,
    successful_models: Option<i64>,
    failed_models: Option<i64>,
    created_at: String,
    completed_at: Option<String>,
}

impl CheckRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            user_id: row.get(2)?,
            prompt: row.get(3)?,
            brands: row.get(4)?,
            models: row.get(5)?,
            temperature: row.get(6)?,
            max_tokens: row.get(7)?,
            execution_mode: row.get(8)?,
            metadata: row.get(9)?,
            status: row.get(10)?,
            total_mentions: row.get(11)?,
            brands_mentioned: row.get(12)?,
            mention_rate: row.get(13)?,
            avg_confidence: row.get(14)?,
            successful_models: row.get(15)?,
            failed_models: row.get(16)?,
            created_at: row.get(17)?,
            completed_at: row.get(18)?,
        })
    }

    fn summary(&self) -> Result<Option<DetectionSummary>, RepositoryError> {
        let Some(total_mentions) = self.total_mentions else {
            return Ok(None);
        };
        let brands_mentioned = match &self.brands_mentioned {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        Ok(Some(DetectionSummary {
            total_mentions: total_mentions as usize,
            brands_mentioned,
            mention_rate: self.mention_rate.unwrap_or(0.0),
            avg_confidence: self.avg_confidence.unwrap_or(0.0),
            successful_models: self.successful_models.unwrap_or(0) as usize,
            failed_models: self.failed_models.unwrap_or(0) as usize,
        }))
    }

    fn into_check(self, results: Vec<ModelResult>) -> Result<DetectionCheck, RepositoryError> {
        let summary = self.summary()?;
        Ok(DetectionCheck {
            brands: serde_json::from_str(&self.brands)?,
            models: serde_json::from_str(&self.models)?,
            temperature: self.temperature as f32,
            max_tokens: self.max_tokens,
            execution_mode: parse_field(&self.execution_mode)?,
            metadata: serde_json::from_str(&self.metadata)?,
            status: parse_field(&self.status)?,
            created_at: parse_ts(&self.created_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            id: self.id,
            project_id: self.project_id,
            user_id: self.user_id,
            prompt: self.prompt,
            results,
            summary,
        })
    }

    fn into_overview(self) -> Result<CheckOverview, RepositoryError> {
        Ok(CheckOverview {
            brands: serde_json::from_str(&self.brands)?,
            models: serde_json::from_str(&self.models)?,
            status: parse_field(&self.status)?,
            total_mentions: self.total_mentions.map(|n| n as u64),
            mention_rate: self.mention_rate,
            created_at: parse_ts(&self.created_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            id: self.id,
            user_id: self.user_id,
            prompt: self.prompt,
        })
    }
}

fn load_check(conn: &Connection, check_id: &str) -> Result<Option<DetectionCheck>, RepositoryError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM detection_checks WHERE id = ?1", CHECK_COLUMNS),
            params![check_id],
            CheckRow::from_row,
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };
    let results = load_results(conn, check_id)?;
    row.into_check(results).map(Some)
}

fn history_where(filter: &CheckFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut conditions = vec!["project_id = ?"];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref brand) = filter.brand {
        conditions.push("EXISTS (SELECT 1 FROM json_each(brands) WHERE json_each.value = ?)");
        values.push(Box::new(brand.clone()));
    }
    if let Some(ref model) = filter.model {
        conditions.push("EXISTS (SELECT 1 FROM json_each(models) WHERE json_each.value = ?)");
        values.push(Box::new(model.clone()));
    }
    if let Some(status) = filter.status {
        conditions.push("status = ?");
        values.push(Box::new(status.as_str()));
    }

    (format!("WHERE {}", conditions.join(" AND ")), values)
}

fn list_checks(
    conn: &Connection,
    project_id: &str,
    filter: &CheckFilter,
) -> Result<Vec<CheckOverview>, RepositoryError> {
    let (where_clause, filter_values) = history_where(filter);
    let sql = format!(
        "SELECT {} FROM detection_checks {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        CHECK_COLUMNS, where_clause
    );

    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project_id.to_string())];
    values.extend(filter_values);
    values.push(Box::new(filter.limit));
    values.push(Box::new(filter.offset));
    let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(refs.as_slice(), CheckRow::from_row)?;

    let mut checks = Vec::new();
    for row in rows {
        checks.push(row?.into_overview()?);
    }
    Ok(checks)
}

fn count_checks(conn: &Connection, project_id: &str, filter: &CheckFilter) -> Result<u64, RepositoryError> {
    let (where_clause, filter_values) = history_where(filter);
    let sql = format!("SELECT COUNT(*) FROM detection_checks {}", where_clause);

    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project_id.to_string())];
    values.extend(filter_values);
    let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();

    let count: i64 = conn.query_row(&sql, refs.as_slice(), |row| row.get(0))?;
    Ok(count as u64)
}

// =============================================================================
// Results and mentions
// =============================================================================

fn upsert_result(conn: &Connection, check_id: &str, result: &ModelResult) -> Result<String, RepositoryError> {
    let id = derive_id(&[check_id, &result.model]);
    let usage = result.usage.as_ref();
    conn.execute(
        "INSERT INTO model_results (id, check_id, model, ordinal, response_text, latency_ms, prompt_tokens, completion_tokens, total_tokens, error_kind, error_message, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT(check_id, model) DO UPDATE SET \
            ordinal = excluded.ordinal, response_text = excluded.response_text, latency_ms = excluded.latency_ms, \
            prompt_tokens = excluded.prompt_tokens, completion_tokens = excluded.completion_tokens, \
            total_tokens = excluded.total_tokens, error_kind = excluded.error_kind, error_message = excluded.error_message",
        params![
            id,
            check_id,
            result.model,
            result.ordinal as i64,
            result.response_text,
            result.latency_ms as i64,
            usage.map(|u| u.prompt_tokens),
            usage.map(|u| u.completion_tokens),
            usage.map(|u| u.total_tokens),
            result.error.as_ref().map(|e| e.kind.as_str()),
            result.error.as_ref().map(|e| e.message.clone()),
            ts(&Utc::now()),
        ],
    )?;
    Ok(id)
}

fn upsert_mentions(
    conn: &mut Connection,
    check_id: &str,
    result_id: &str,
    mentions: &[BrandMention],
) -> Result<Vec<String>, RepositoryError> {
    let tx = conn.transaction()?;
    let now = ts(&Utc::now());
    let mut ids = Vec::with_capacity(mentions.len());
    {
        let mut stmt = tx.prepare(
            "INSERT INTO brand_mentions (id, check_id, result_id, brand, ordinal, mentioned, confidence, positions, contexts, method, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(result_id, brand) DO UPDATE SET \
                ordinal = excluded.ordinal, mentioned = excluded.mentioned, confidence = excluded.confidence, \
                positions = excluded.positions, contexts = excluded.contexts, method = excluded.method",
        )?;
        for (ordinal, mention) in mentions.iter().enumerate() {
            let id = derive_id(&[result_id, &mention.brand]);
            stmt.execute(params![
                id,
                check_id,
                result_id,
                mention.brand,
                ordinal as i64,
                mention.mentioned,
                mention.confidence,
                serde_json::to_string(&mention.positions)?,
                serde_json::to_string(&mention.contexts)?,
                mention.method.to_string(),
                now,
            ])?;
            ids.push(id);
        }
    }
    tx.commit()?;
    Ok(ids)
}

fn load_results(conn: &Connection, check_id: &str) -> Result<Vec<ModelResult>, RepositoryError> {
    let mut stmt = conn.prepare(
        "SELECT id, model, ordinal, response_text, latency_ms, prompt_tokens, completion_tokens, total_tokens, error_kind, error_message \
         FROM model_results WHERE check_id = ?1 ORDER BY ordinal",
    )?;
    let rows = stmt.query_map(params![check_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, Option<u32>>(5)?,
            row.get::<_, Option<u32>>(6)?,
            row.get::<_, Option<u32>>(7)?,
            row.get::<_, Option<String>>(8)?,
            row.get::<_, Option<String>>(9)?,
        ))
    })?;

    let mut results = Vec::new();
    for row in rows {
        let (id, model, ordinal, response_text, latency_ms, prompt, completion, total, error_kind, error_message) =
            row?;
        let usage = match (prompt, completion, total) {
            (Some(prompt_tokens), Some(completion_tokens), Some(total_tokens)) => Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            }),
            _ => None,
        };
        let error = match error_kind {
            Some(kind) => Some(ModelError {
                kind: parse_field(&kind)?,
                message: error_message.unwrap_or_default(),
            }),
            None => None,
        };
        results.push(ModelResult {
            mentions: load_mentions(conn, &id)?,
            model,
            ordinal: ordinal as usize,
            response_text,
            latency_ms: latency_ms as u64,
            usage,
            error,
        });
    }
    Ok(results)
}

fn load_mentions(conn: &Connection, result_id: &str) -> Result<Vec<BrandMention>, RepositoryError> {
    let mut stmt = conn.prepare(
        "SELECT brand, mentioned, confidence, positions, contexts, method \
         FROM brand_mentions WHERE result_id = ?1 ORDER BY ordinal",
    )?;
    let rows = stmt.query_map(params![result_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, bool>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut mentions = Vec::new();
    for row in rows {
        let (brand, mentioned, confidence, positions, contexts, method) = row?;
        mentions.push(BrandMention {
            brand,
            mentioned,
            confidence,
            positions: serde_json::from_str(&positions)?,
            contexts: serde_json::from_str(&contexts)?,
            method: parse_field(&method)?,
        });
    }
    Ok(mentions)
}

// =============================================================================
// Analytics
// =============================================================================

/// Mentions from successful results of a project's checks since a start time.
const WINDOWED_MENTIONS: &str = "FROM brand_mentions m \
     JOIN model_results r ON r.id = m.result_id \
     JOIN detection_checks c ON c.id = r.check_id \
     WHERE c.project_id = ?1 AND c.created_at >= ?2 AND m.brand = ?3 AND r.error_kind IS NULL";

fn brand_stats(
    conn: &Connection,
    project_id: &str,
    brand: &str,
    window_days: u32,
) -> Result<BrandMentionStats, RepositoryError> {
    let since = window_start(window_days);

    let total_checks: i64 = conn.query_row(
        "SELECT COUNT(*) FROM detection_checks c \
         WHERE c.project_id = ?1 AND c.created_at >= ?2 \
         AND EXISTS (SELECT 1 FROM json_each(c.brands) WHERE json_each.value = ?3)",
        params![project_id, since, brand],
        |row| row.get(0),
    )?;

    let (evaluations, mentions, avg_confidence): (i64, i64, Option<f64>) = conn.query_row(
        &format!(
            "SELECT COUNT(*), COALESCE(SUM(m.mentioned), 0), AVG(CASE WHEN m.mentioned = 1 THEN m.confidence END) {}",
            WINDOWED_MENTIONS
        ),
        params![project_id, since, brand],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT r.model, COUNT(*), COALESCE(SUM(m.mentioned), 0), AVG(CASE WHEN m.mentioned = 1 THEN m.confidence END) {} \
         GROUP BY r.model ORDER BY r.model",
        WINDOWED_MENTIONS
    ))?;
    let rows = stmt.query_map(params![project_id, since, brand], |row| {
        let evaluations: i64 = row.get(1)?;
        let mentions: i64 = row.get(2)?;
        Ok(ModelMentionStats {
            model: row.get(0)?,
            evaluations: evaluations as u64,
            mentions: mentions as u64,
            mention_rate: rate(mentions as u64, evaluations as u64),
            avg_confidence: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        })
    })?;
    let models = rows.collect::<Result<Vec<_>, _>>()?;

    Ok(BrandMentionStats {
        brand: brand.to_string(),
        window_days,
        total_checks: total_checks as u64,
        total_evaluations: evaluations as u64,
        total_mentions: mentions as u64,
        mention_rate: rate(mentions as u64, evaluations as u64),
        avg_confidence: avg_confidence.unwrap_or(0.0),
        models,
    })
}

fn build_report(conn: &Connection, project_id: &str) -> Result<ProjectReport, RepositoryError> {
    let mut status_counts = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM detection_checks WHERE project_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            status_counts.insert(status, count as u64);
        }
    }
    let total_checks = status_counts.values().sum();

    let mut brands = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT m.brand, COUNT(*), COALESCE(SUM(m.mentioned), 0), AVG(CASE WHEN m.mentioned = 1 THEN m.confidence END) \
             FROM brand_mentions m \
             JOIN model_results r ON r.id = m.result_id \
             JOIN detection_checks c ON c.id = r.check_id \
             WHERE c.project_id = ?1 AND r.error_kind IS NULL \
             GROUP BY m.brand ORDER BY m.brand",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<f64>>(3)?,
            ))
        })?;
        for row in rows {
            let (brand, evaluations, mentions, avg_confidence) = row?;
            brands.push(BrandReport {
                sample_contexts: sample_contexts(conn, project_id, &brand)?,
                brand,
                evaluations: evaluations as u64,
                mentions: mentions as u64,
                mention_rate: rate(mentions as u64, evaluations as u64),
                avg_confidence: avg_confidence.unwrap_or(0.0),
            });
        }
    }

    let mut model_mentions: HashMap<String, (u64, u64)> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT r.model, COUNT(m.id), COALESCE(SUM(m.mentioned), 0) \
             FROM brand_mentions m \
             JOIN model_results r ON r.id = m.result_id \
             JOIN detection_checks c ON c.id = r.check_id \
             WHERE c.project_id = ?1 AND r.error_kind IS NULL \
             GROUP BY r.model",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (model, evaluations, mentions) = row?;
            model_mentions.insert(model, (evaluations as u64, mentions as u64));
        }
    }

    let mut models = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT r.model, COUNT(*), \
                SUM(CASE WHEN r.error_kind IS NULL THEN 1 ELSE 0 END), \
                AVG(CASE WHEN r.error_kind IS NULL THEN LENGTH(r.response_text) END), \
                AVG(r.latency_ms) \
             FROM model_results r \
             JOIN detection_checks c ON c.id = r.check_id \
             WHERE c.project_id = ?1 \
             GROUP BY r.model ORDER BY r.model",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
            ))
        })?;
        for row in rows {
            let (model, total, successful, avg_length, avg_latency) = row?;
            let (evaluations, mentions) = model_mentions.get(&model).copied().unwrap_or((0, 0));
            models.push(ModelReport {
                model,
                total_calls: total as u64,
                successful_calls: successful as u64,
                success_rate: rate(successful as u64, total as u64),
                mention_rate: rate(mentions, evaluations),
                avg_response_length: avg_length.unwrap_or(0.0),
                avg_latency_ms: avg_latency.unwrap_or(0.0),
            });
        }
    }

    Ok(ProjectReport {
        project_id: project_id.to_string(),
        total_checks,
        status_counts,
        brands,
        models,
    })
}

fn sample_contexts(conn: &Connection, project_id: &str, brand: &str) -> Result<Vec<String>, RepositoryError> {
    let mut stmt = conn.prepare(
        "SELECT m.contexts FROM brand_mentions m \
         JOIN detection_checks c ON c.id = m.check_id \
         WHERE c.project_id = ?1 AND m.brand = ?2 AND m.mentioned = 1 \
         ORDER BY c.created_at DESC, m.ordinal LIMIT 5",
    )?;
    let rows = stmt.query_map(params![project_id, brand], |row| row.get::<_, String>(0))?;

    let mut samples = Vec::new();
    for row in rows {
        let contexts: Vec<String> = serde_json::from_str(&row?)?;
        if let Some(first) = contexts.into_iter().next() {
            samples.push(first);
        }
    }
    Ok(samples)
}

// =============================================================================
// Templates
// =============================================================================

const TEMPLATE_COLUMNS: &str =
    "id, user_id, name, category, template, variables, description, usage_count, is_public, created_at, updated_at";

fn row_to_template(row: &rusqlite::Row) -> rusqlite::Result<(PromptTemplate, String, String, String)> {
    // Timestamps and variables are parsed by the caller so their errors surface.
    Ok((
        PromptTemplate {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            template: row.get(4)?,
            variables: Vec::new(),
            description: row.get(6)?,
            usage_count: row.get::<_, i64>(7)? as u64,
            is_public: row.get(8)?,
            created_at: DateTime::<Utc>::MIN_UTC,
            updated_at: DateTime::<Utc>::MIN_UTC,
        },
        row.get(5)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn finish_template(
    (mut template, variables, created_at, updated_at): (PromptTemplate, String, String, String),
) -> Result<PromptTemplate, RepositoryError> {
    template.variables = serde_json::from_str(&variables)?;
    template.created_at = parse_ts(&created_at)?;
    template.updated_at = parse_ts(&updated_at)?;
    Ok(template)
}

fn upsert_template(conn: &Connection, template: &PromptTemplate) -> Result<(), RepositoryError> {
    conn.execute(
        "INSERT INTO prompt_templates (id, user_id, name, category, template, variables, description, usage_count, is_public, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT(id) DO UPDATE SET \
            name = excluded.name, category = excluded.category, template = excluded.template, \
            variables = excluded.variables, description = excluded.description, \
            is_public = excluded.is_public, updated_at = excluded.updated_at",
        params![
            template.id,
            template.user_id,
            template.name,
            template.category,
            template.template,
            serde_json::to_string(&template.variables)?,
            template.description,
            template.usage_count as i64,
            template.is_public,
            ts(&template.created_at),
            ts(&template.updated_at),
        ],
    )?;
    Ok(())
}

fn load_template(conn: &Connection, id: &str) -> Result<Option<PromptTemplate>, RepositoryError> {
    conn.query_row(
        &format!("SELECT {} FROM prompt_templates WHERE id = ?1", TEMPLATE_COLUMNS),
        params![id],
        row_to_template,
    )
    .optional()?
    .map(finish_template)
    .transpose()
}

fn query_templates(
    conn: &Connection,
    user_id: &str,
    filter: &TemplateFilter,
) -> Result<Vec<PromptTemplate>, RepositoryError> {
    let mut sql = format!(
        "SELECT {} FROM prompt_templates WHERE (user_id = ? OR is_public = 1)",
        TEMPLATE_COLUMNS
    );
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];
    if let Some(ref category) = filter.category {
        sql.push_str(" AND category = ?");
        values.push(Box::new(category.clone()));
    }
    sql.push_str(" ORDER BY usage_count DESC, created_at DESC LIMIT ? OFFSET ?");
    values.push(Box::new(filter.limit));
    values.push(Box::new(filter.offset));
    let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(refs.as_slice(), row_to_template)?;
    let mut templates = Vec::new();
    for row in rows {
        templates.push(finish_template(row?)?);
    }
    Ok(templates)
}

#[async_trait]
impl MentionRepository for SqliteMentionRepository {
    async fn create_check(&self, check: &DetectionCheck) -> Result<String, RepositoryError> {
        let check = check.clone();
        self.run(move |conn| {
            insert_check(conn, &check)?;
            Ok(check.id)
        })
        .await
    }

    async fn update_check_status(
        &self,
        check_id: &str,
        update: StatusUpdate,
    ) -> Result<bool, RepositoryError> {
        let check_id = check_id.to_string();
        self.run(move |conn| apply_status(conn, &check_id, &update))
            .await
    }

    async fn save_result(&self, check_id: &str, result: &ModelResult) -> Result<String, RepositoryError> {
        let check_id = check_id.to_string();
        let result = result.clone();
        self.run(move |conn| upsert_result(conn, &check_id, &result))
            .await
    }

    async fn save_mentions(
        &self,
        check_id: &str,
        result_id: &str,
        mentions: &[BrandMention],
    ) -> Result<Vec<String>, RepositoryError> {
        let check_id = check_id.to_string();
        let result_id = result_id.to_string();
        let mentions = mentions.to_vec();
        self.run(move |conn| upsert_mentions(conn, &check_id, &result_id, &mentions))
            .await
    }

    async fn get_check(&self, check_id: &str) -> Result<Option<DetectionCheck>, RepositoryError> {
        let check_id = check_id.to_string();
        self.run(move |conn| load_check(conn, &check_id)).await
    }

    async fn get_checks_by_project(
        &self,
        project_id: &str,
        filter: &CheckFilter,
    ) -> Result<Vec<CheckOverview>, RepositoryError> {
        let project_id = project_id.to_string();
        let filter = filter.clone();
        self.run(move |conn| list_checks(conn, &project_id, &filter))
            .await
    }

    async fn count_checks_by_project(
        &self,
        project_id: &str,
        filter: &CheckFilter,
    ) -> Result<u64, RepositoryError> {
        let project_id = project_id.to_string();
        let filter = filter.clone();
        self.run(move |conn| count_checks(conn, &project_id, &filter))
            .await
    }

    async fn get_brand_mention_stats(
        &self,
        project_id: &str,
        brand: &str,
        window_days: u32,
    ) -> Result<BrandMentionStats, RepositoryError> {
        let project_id = project_id.to_string();
        let brand = brand.to_string();
        self.run(move |conn| brand_stats(conn, &project_id, &brand, window_days))
            .await
    }

    async fn project_report(&self, project_id: &str) -> Result<ProjectReport, RepositoryError> {
        let project_id = project_id.to_string();
        self.run(move |conn| build_report(conn, &project_id)).await
    }

    async fn save_template(&self, template: &PromptTemplate) -> Result<(), RepositoryError> {
        let template = template.clone();
        self.run(move |conn| upsert_template(conn, &template)).await
    }

    async fn get_template(&self, id: &str) -> Result<Option<PromptTemplate>, RepositoryError> {
        let id = id.to_string();
        self.run(move |conn| load_template(conn, &id)).await
    }

    async fn list_templates(
        &self,
        user_id: &str,
        filter: &TemplateFilter,
    ) -> Result<Vec<PromptTemplate>, RepositoryError> {
        let user_id = user_id.to_string();
        let filter = filter.clone();
        self.run(move |conn| query_templates(conn, &user_id, &filter))
            .await
    }

    async fn increment_template_usage(&self, id: &str) -> Result<bool, RepositoryError> {
        let id = id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE prompt_templates SET usage_count = usage_count + 1, updated_at = ?1 WHERE id = ?2",
                params![ts(&Utc::now()), id],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}
