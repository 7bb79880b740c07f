//! Durable Store Schema
//!
//! Idempotent DDL for every table. Timestamps are Unix milliseconds;
//! JSON-shaped columns are TEXT.

/// Core entity tables
pub const CORE_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS tenants (
        id              TEXT PRIMARY KEY,
        name            TEXT NOT NULL,
        settings        TEXT NOT NULL DEFAULT '{}',
        channels        TEXT NOT NULL DEFAULT '[]',
        roles           TEXT NOT NULL DEFAULT '[]',
        premium_until   INTEGER,
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS members (
        id              TEXT NOT NULL,
        tenant_id       TEXT NOT NULL,
        joined_at       INTEGER NOT NULL,
        verified_at     INTEGER,
        roles           TEXT NOT NULL DEFAULT '[]',
        settings        TEXT NOT NULL DEFAULT '{}',
        updated_at      INTEGER NOT NULL,
        PRIMARY KEY (id, tenant_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS messages (
        id              TEXT NOT NULL,
        tenant_id       TEXT NOT NULL,
        channel_id      TEXT NOT NULL,
        author_id       TEXT NOT NULL,
        content         TEXT NOT NULL,
        kind            TEXT NOT NULL DEFAULT 'message',
        created_at      INTEGER NOT NULL,
        updated_at      INTEGER NOT NULL,
        PRIMARY KEY (id, tenant_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_messages_tenant_kind ON messages (tenant_id, kind)",
    r#"CREATE TABLE IF NOT EXISTS telemetry (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id       TEXT NOT NULL,
        event_type      TEXT NOT NULL,
        payload         TEXT NOT NULL DEFAULT '{}',
        created_at      INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_telemetry_lookup ON telemetry (tenant_id, event_type, created_at)",
    r#"CREATE TABLE IF NOT EXISTS verifications (
        member_id       TEXT NOT NULL,
        tenant_id       TEXT NOT NULL,
        status          TEXT NOT NULL,
        method          TEXT NOT NULL,
        attempts        INTEGER NOT NULL DEFAULT 0,
        created_at      INTEGER NOT NULL,
        completed_at    INTEGER,
        PRIMARY KEY (member_id, tenant_id)
    )"#,
];

/// Feature tables copied by backup and migration
pub const FEATURE_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS connections (
        id                  TEXT NOT NULL,
        tenant_id           TEXT NOT NULL,
        channel_id          TEXT NOT NULL,
        target_tenant_id    TEXT NOT NULL,
        target_channel_id   TEXT NOT NULL,
        created_at          INTEGER NOT NULL,
        PRIMARY KEY (id, tenant_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS economy_accounts (
        tenant_id       TEXT NOT NULL,
        member_id       TEXT NOT NULL,
        balance         INTEGER NOT NULL DEFAULT 0,
        bank            INTEGER NOT NULL DEFAULT 0,
        updated_at      INTEGER NOT NULL,
        PRIMARY KEY (tenant_id, member_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS economy_transactions (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id       TEXT NOT NULL,
        member_id       TEXT NOT NULL,
        amount          INTEGER NOT NULL,
        kind            TEXT NOT NULL,
        description     TEXT,
        created_at      INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_economy_transactions_tenant ON economy_transactions (tenant_id)",
];

/// Operational tables used by monitoring and backup
pub const OPERATIONAL_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS metrics (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        name            TEXT NOT NULL,
        value           REAL NOT NULL,
        tags            TEXT NOT NULL DEFAULT '{}',
        created_at      INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_metrics_name_time ON metrics (name, created_at)",
    r#"CREATE TABLE IF NOT EXISTS alerts (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        severity        TEXT NOT NULL,
        severity_rank   INTEGER NOT NULL,
        title           TEXT NOT NULL,
        message         TEXT NOT NULL,
        tags            TEXT NOT NULL DEFAULT '{}',
        notified        INTEGER NOT NULL DEFAULT 0,
        created_at      INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS health_checks (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        status          TEXT NOT NULL,
        report          TEXT NOT NULL,
        created_at      INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS backups (
        location        TEXT PRIMARY KEY,
        tenant_id       TEXT NOT NULL,
        kind            TEXT NOT NULL,
        size_bytes      INTEGER NOT NULL,
        created_at      INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_backups_tenant_time ON backups (tenant_id, created_at)",
];

/// Every statement, in creation order
pub fn all_statements() -> impl Iterator<Item = &'static str> {
    CORE_TABLES
        .iter()
        .chain(FEATURE_TABLES.iter())
        .chain(OPERATIONAL_TABLES.iter())
        .copied()
}
