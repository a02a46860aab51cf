/// Schema for the local mirror. Every statement is safe to run on each open.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS Links (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    note TEXT,
    url TEXT NOT NULL,
    category TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    done INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    record_url TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_links_order ON Links(done, modified_at);

CREATE TABLE IF NOT EXISTS Lists (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    note TEXT,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    record_url TEXT NOT NULL DEFAULT ''
);

-- Link to List membership. list_id may name a List that is not cached yet.
CREATE TABLE IF NOT EXISTS LinkLists (
    link_id TEXT NOT NULL,
    list_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (link_id, list_id)
);

CREATE INDEX IF NOT EXISTS idx_link_lists_list ON LinkLists(list_id);

CREATE TABLE IF NOT EXISTS Metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;
