pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS crosswalk_cache (
    entity_id TEXT NOT NULL,
    radius_m REAL NOT NULL,
    reach_id INTEGER,
    distance_m REAL NOT NULL,
    resolved INTEGER NOT NULL,
    method TEXT NOT NULL,
    resolved_at TEXT NOT NULL,
    PRIMARY KEY (entity_id, radius_m)
);

CREATE TABLE IF NOT EXISTS metric_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_date TEXT NOT NULL,
    pair TEXT NOT NULL,
    scope TEXT NOT NULL,
    min_pairs INTEGER NOT NULL,
    n INTEGER NOT NULL,
    log_n INTEGER NOT NULL,
    sufficient INTEGER NOT NULL,
    result_json TEXT NOT NULL,
    captured_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metric_history_pair_date
    ON metric_history(pair, target_date DESC);
"#;
