#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_installed_apps",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS installed_apps (
    identity TEXT PRIMARY KEY,
    app_kind TEXT NOT NULL,
    current_version TEXT NOT NULL,
    current_location TEXT NOT NULL,
    update_manifest_url TEXT,
    updated_at_unix INTEGER NOT NULL
);
"#,
    down_sql: r#"
DROP TABLE IF EXISTS installed_apps;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_pending_updates",
    up_sql: r#"
ALTER TABLE installed_apps ADD COLUMN pending_version TEXT;
ALTER TABLE installed_apps ADD COLUMN pending_location TEXT;
"#,
    down_sql: r#"
ALTER TABLE installed_apps DROP COLUMN pending_location;
ALTER TABLE installed_apps DROP COLUMN pending_version;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map_or(0, |entry| entry.version)
}
