//! SQLite schema for the durable build store.

/// Bump when the schema changes shape.
pub const SCHEMA_VERSION: &str = "1";

/// Records are stored with resolved strings (not interner codes) so the
/// database is self-contained across restarts; strings are re-interned on
/// read against the owning handle's table.
pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS builds (
    id          INTEGER PRIMARY KEY,
    branch      TEXT NOT NULL,
    start_ts_ms INTEGER NOT NULL,
    payload     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_builds_branch_start
    ON builds(branch, start_ts_ms DESC);

CREATE TABLE IF NOT EXISTS chainstat_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";
