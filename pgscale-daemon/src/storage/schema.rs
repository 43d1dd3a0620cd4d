//! Bridge schema: metadata table and built-in statistics views.

pub const SCHEMA_VERSION: &str = "1";

/// Views created with the schema, queryable without any host setup.
pub const BUILTIN_VIEWS: &[&str] = &["pgscale_tables", "pgscale_settings"];

/// SQL schema applied when the database is opened read-write.
pub const SCHEMA_SQL: &str = r#"
-- Bridge metadata (schema version etc.)
CREATE TABLE IF NOT EXISTS pgscale_metadata (
    key VARCHAR PRIMARY KEY,
    value VARCHAR
);

-- Per-table size statistics for user tables
CREATE OR REPLACE VIEW pgscale_tables AS
    SELECT schema_name, table_name, estimated_size, column_count
    FROM duckdb_tables()
    WHERE NOT internal
    ORDER BY schema_name, table_name;

-- Current engine settings
CREATE OR REPLACE VIEW pgscale_settings AS
    SELECT name, value, description
    FROM duckdb_settings()
    ORDER BY name;
"#;
