pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    name TEXT NOT NULL,
    connector_id TEXT NOT NULL,
    system TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    direction TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    batch_size INTEGER NOT NULL,
    batch_delay_ms INTEGER NOT NULL,
    state TEXT NOT NULL DEFAULT 'draft',
    total_count INTEGER NOT NULL DEFAULT 0,
    draft_count INTEGER NOT NULL DEFAULT 0,
    processing_count INTEGER NOT NULL DEFAULT 0,
    done_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    created_count INTEGER NOT NULL DEFAULT 0,
    updated_count INTEGER NOT NULL DEFAULT 0,
    process_count INTEGER NOT NULL DEFAULT 0,
    is_action_required INTEGER NOT NULL DEFAULT 0,
    action_required_reason TEXT,
    created_by TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_process_date TEXT,
    UNIQUE(org_id, idempotency_key)
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_org_state ON sync_queue(org_id, state);

CREATE TABLE IF NOT EXISTS sync_queue_line (
    id TEXT PRIMARY KEY,
    queue_id TEXT NOT NULL REFERENCES sync_queue(id) ON DELETE CASCADE,
    org_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    external_key TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    internal_id TEXT,
    payload TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'draft',
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    process_count INTEGER NOT NULL DEFAULT 0,
    was_update INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_process_date TEXT,
    UNIQUE(queue_id, external_key)
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_line_state ON sync_queue_line(queue_id, state, position);

CREATE TABLE IF NOT EXISTS integration_mapping (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id TEXT NOT NULL,
    connector_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    internal_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    external_model TEXT NOT NULL,
    direction TEXT NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    active INTEGER NOT NULL DEFAULT 1,
    sync_data TEXT,
    last_synced_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_mapping_internal
    ON integration_mapping(connector_id, entity_type, internal_id) WHERE active = 1;
CREATE UNIQUE INDEX IF NOT EXISTS idx_mapping_external
    ON integration_mapping(connector_id, entity_type, external_id) WHERE active = 1;

CREATE TABLE IF NOT EXISTS sync_activity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id TEXT NOT NULL,
    queue_id TEXT,
    line_id TEXT,
    entity_type TEXT NOT NULL,
    entity_id TEXT,
    external_id TEXT,
    direction TEXT,
    status TEXT NOT NULL,
    operation TEXT NOT NULL,
    records_affected INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    message TEXT,
    request_payload TEXT,
    response_payload TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_activity_queue ON sync_activity(queue_id, id);
CREATE INDEX IF NOT EXISTS idx_sync_activity_org ON sync_activity(org_id, id);

CREATE TABLE IF NOT EXISTS sync_preview_cache (
    org_id TEXT NOT NULL,
    system TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    inbound TEXT,
    outbound TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (org_id, system, entity_type)
);

CREATE TABLE IF NOT EXISTS local_record (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(org_id, entity_type, natural_key)
);
";
