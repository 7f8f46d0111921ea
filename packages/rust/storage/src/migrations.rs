//! SQL migration definitions for the TenderScope historical store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: opportunities, runs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per opportunity identifier (latest version wins)
CREATE TABLE IF NOT EXISTS opportunities (
    id                 TEXT PRIMARY KEY,
    source             TEXT NOT NULL,
    need_type          TEXT NOT NULL DEFAULT '',
    published_at       TEXT NOT NULL DEFAULT '',
    province_canton    TEXT NOT NULL DEFAULT '',
    description        TEXT NOT NULL DEFAULT '',
    status             TEXT NOT NULL DEFAULT '',
    deadline           TEXT NOT NULL DEFAULT '',
    buyer              TEXT NOT NULL DEFAULT '',
    delivery_address   TEXT NOT NULL DEFAULT '',
    contact            TEXT NOT NULL DEFAULT '',
    detail_ref         TEXT,
    budget             REAL,
    search_keyword     TEXT,
    contract_code      TEXT,
    line_items_json    TEXT NOT NULL DEFAULT '[]',
    category           TEXT,
    matched_keywords_json TEXT NOT NULL DEFAULT '[]',
    score              REAL,
    priority           TEXT,
    rationale          TEXT,
    recommended_action TEXT,
    assessed_at        TEXT,
    model              TEXT,
    produced_at        TEXT NOT NULL,
    stored_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_opportunities_score ON opportunities(score);

-- Run history
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    stats_json  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index deadlines for report ordering",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_opportunities_deadline ON opportunities(deadline);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
        Migration {
            version: 3,
            description: "Manual tracking columns",
            sql: r#"
ALTER TABLE opportunities ADD COLUMN application_status TEXT DEFAULT 'Por Revisar';
ALTER TABLE opportunities ADD COLUMN owner TEXT;
ALTER TABLE opportunities ADD COLUMN notes TEXT;

INSERT INTO schema_migrations (version) VALUES (3);
"#,
        },
    ]
}
