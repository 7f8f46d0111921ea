//! libSQL-backed historical store (local, offline).
//!
//! The [`Storage`] struct wraps a libSQL database holding one row per
//! opportunity identifier plus a history of runs.
//!
//! **Access rules:**
//! - the pipeline reads the whole store once at start via
//!   [`Storage::load_opportunities`] and writes once at the end via
//!   [`Storage::save_run`], inside a single transaction
//! - rows are upserted, never deleted
//! - `tenderscope report` uses [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Row, params};
use tracing::{debug, info, warn};

use tenderscope_shared::{
    ContractCode, LineItem, Opportunity, Priority, RelevanceAssessment, Result, Source,
    TenderScopeError,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// One row of the `runs` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Serialized run summary.
    pub stats_json: String,
}

impl RunRecord {
    /// A run record with a fresh time-ordered id.
    pub fn new(started_at: DateTime<Utc>, stats_json: String) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            started_at,
            finished_at: Utc::now(),
            stats_json,
        }
    }
}

fn storage_err(e: impl std::fmt::Display) -> TenderScopeError {
    TenderScopeError::Persistence(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TenderScopeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TenderScopeError::Persistence(format!(
                "store not found at {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        TenderScopeError::Persistence(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(TenderScopeError::Persistence(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Opportunities
    // -----------------------------------------------------------------------

    /// Read every stored opportunity, ordered by identifier.
    pub async fn load_opportunities(&self) -> Result<Vec<Opportunity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source, need_type, published_at, province_canton, description,
                        status, deadline, buyer, delivery_address, contact, detail_ref,
                        budget, search_keyword, contract_code, line_items_json, category,
                        matched_keywords_json, score, priority, rationale,
                        recommended_action, assessed_at, model, produced_at,
                        application_status, owner, notes
                 FROM opportunities ORDER BY id",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_opportunity(&row)?);
        }
        debug!(count = results.len(), "historical store loaded");
        Ok(results)
    }

    /// Number of stored opportunities.
    pub async fn count_opportunities(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM opportunities", params![])
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)? as usize),
            None => Ok(0),
        }
    }

    /// Upsert `entries` and record `run`, all in one transaction.
    ///
    /// Either every row lands or none does. The manual tracking columns
    /// (`application_status`, `owner`, `notes`) are never written here.
    pub async fn save_run(&self, entries: &[Opportunity], run: &RunRecord) -> Result<()> {
        self.check_writable()?;

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        let stored_at = Utc::now().to_rfc3339();

        for op in entries {
            let line_items = serde_json::to_string(&op.line_items).map_err(storage_err)?;
            let keywords = serde_json::to_string(&op.matched_keywords).map_err(storage_err)?;
            let assessment = op.assessment.as_ref();

            tx.execute(
                "INSERT INTO opportunities (
                    id, source, need_type, published_at, province_canton, description,
                    status, deadline, buyer, delivery_address, contact, detail_ref,
                    budget, search_keyword, contract_code, line_items_json, category,
                    matched_keywords_json, score, priority, rationale,
                    recommended_action, assessed_at, model, produced_at, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)
                 ON CONFLICT(id) DO UPDATE SET
                    source = excluded.source,
                    need_type = excluded.need_type,
                    published_at = excluded.published_at,
                    province_canton = excluded.province_canton,
                    description = excluded.description,
                    status = excluded.status,
                    deadline = excluded.deadline,
                    buyer = excluded.buyer,
                    delivery_address = excluded.delivery_address,
                    contact = excluded.contact,
                    detail_ref = excluded.detail_ref,
                    budget = excluded.budget,
                    search_keyword = excluded.search_keyword,
                    contract_code = excluded.contract_code,
                    line_items_json = excluded.line_items_json,
                    category = excluded.category,
                    matched_keywords_json = excluded.matched_keywords_json,
                    score = excluded.score,
                    priority = excluded.priority,
                    rationale = excluded.rationale,
                    recommended_action = excluded.recommended_action,
                    assessed_at = excluded.assessed_at,
                    model = excluded.model,
                    produced_at = excluded.produced_at,
                    stored_at = excluded.stored_at",
                params![
                    op.id.as_str(),
                    op.source.as_str(),
                    op.need_type.as_str(),
                    op.published_at.as_str(),
                    op.province_canton.as_str(),
                    op.description.as_str(),
                    op.status.as_str(),
                    op.deadline.as_str(),
                    op.buyer.as_str(),
                    op.delivery_address.as_str(),
                    op.contact.as_str(),
                    op.detail_ref.as_deref(),
                    op.budget,
                    op.search_keyword.as_deref(),
                    op.contract_code.as_ref().map(ContractCode::as_str),
                    line_items,
                    op.category.as_deref(),
                    keywords,
                    assessment.map(|a| a.score),
                    assessment.map(|a| a.priority.as_str()),
                    assessment.map(|a| a.rationale.as_str()),
                    assessment.map(|a| a.recommended_action.as_str()),
                    assessment.map(|a| a.assessed_at.to_rfc3339()),
                    assessment.map(|a| a.model.as_str()),
                    op.produced_at.to_rfc3339(),
                    stored_at.as_str(),
                ],
            )
            .await
            .map_err(|e| TenderScopeError::Persistence(format!("upsert {}: {e}", op.id)))?;
        }

        tx.execute(
            "INSERT INTO runs (id, started_at, finished_at, stats_json) VALUES (?1, ?2, ?3, ?4)",
            params![
                run.id.as_str(),
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                run.stats_json.as_str(),
            ],
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        info!(entries = entries.len(), run_id = %run.id, "store saved");
        Ok(())
    }

    /// Update the manual tracking columns of one opportunity.
    ///
    /// `None` leaves a column as it is. Fails when `id` is not stored.
    pub async fn set_tracking(
        &self,
        id: &str,
        application_status: Option<&str>,
        owner: Option<&str>,
        notes: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE opportunities SET
                    application_status = COALESCE(?2, application_status),
                    owner = COALESCE(?3, owner),
                    notes = COALESCE(?4, notes)
                 WHERE id = ?1",
                params![id, application_status, owner, notes],
            )
            .await
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(TenderScopeError::Persistence(format!(
                "no stored opportunity with id {id}"
            )));
        }
        info!(%id, "tracking updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, stats_json FROM runs
                 ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(RunRecord {
                id: row.get::<String>(0).map_err(storage_err)?,
                started_at: parse_timestamp(&row.get::<String>(1).map_err(storage_err)?)?,
                finished_at: parse_timestamp(&row.get::<String>(2).map_err(storage_err)?)?,
                stats_json: row.get::<String>(3).map_err(storage_err)?,
            });
        }
        Ok(results)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TenderScopeError::Persistence(format!("invalid date '{s}': {e}")))
}

/// Convert a database row to an [`Opportunity`].
fn row_to_opportunity(row: &Row) -> Result<Opportunity> {
    let text = |i: i32| row.get::<String>(i).map_err(storage_err);
    let id = text(0)?;
    let source: Source = text(1)?.parse()?;

    let line_items: Vec<LineItem> = serde_json::from_str(&text(15)?).map_err(|e| {
        TenderScopeError::Persistence(format!("{id}: corrupt line items: {e}"))
    })?;
    let matched_keywords: Vec<String> = serde_json::from_str(&text(17)?).map_err(|e| {
        TenderScopeError::Persistence(format!("{id}: corrupt keywords: {e}"))
    })?;

    let contract_code = row.get::<String>(14).ok().and_then(|raw| {
        let code = ContractCode::parse(&raw);
        if code.is_none() {
            warn!(%id, %raw, "ignoring malformed stored contract code");
        }
        code
    });

    let assessment = match (row.get::<f64>(18).ok(), row.get::<String>(19).ok()) {
        (Some(score), Some(priority)) => Some(RelevanceAssessment {
            score,
            priority: priority.parse::<Priority>()?,
            rationale: row.get::<String>(20).ok().unwrap_or_default(),
            recommended_action: row.get::<String>(21).ok().unwrap_or_default(),
            assessed_at: match row.get::<String>(22).ok() {
                Some(s) => parse_timestamp(&s)?,
                None => Utc::now(),
            },
            model: row.get::<String>(23).ok().unwrap_or_default(),
        }),
        _ => None,
    };

    let mut op = Opportunity::new(id, source);
    op.need_type = text(2)?;
    op.published_at = text(3)?;
    op.province_canton = text(4)?;
    op.description = text(5)?;
    op.status = text(6)?;
    op.deadline = text(7)?;
    op.buyer = text(8)?;
    op.delivery_address = text(9)?;
    op.contact = text(10)?;
    op.detail_ref = row.get::<String>(11).ok();
    op.budget = row.get::<f64>(12).ok();
    op.search_keyword = row.get::<String>(13).ok();
    op.contract_code = contract_code;
    op.line_items = line_items;
    op.category = row.get::<String>(16).ok();
    op.matched_keywords = matched_keywords;
    op.assessment = assessment;
    op.produced_at = parse_timestamp(&text(24)?)?;
    op.application_status = row.get::<String>(25).ok();
    op.owner = row.get::<String>(26).ok();
    op.notes = row.get::<String>(27).ok();
    Ok(op)
}
