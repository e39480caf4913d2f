//! The `processing_queue` table (§3.1) and its supporting indexes.
//!
//! Shipped as a constant rather than a migration runner: the corpus's
//! Postgres-backed queue implementations leave schema management to the
//! embedding application, and so does this one.
pub const SCHEMA_SQL: &str = r#"
CREATE TYPE record_status AS ENUM ('pending', 'claimed', 'processing', 'completed', 'failed', 'dead');

CREATE TABLE IF NOT EXISTS processing_queue (
    id UUID PRIMARY KEY,
    flow_kind TEXT NOT NULL,
    payload JSONB NOT NULL,
    status record_status NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,

    claimed_by TEXT,
    claimed_at TIMESTAMPTZ,
    lease_expires_at TIMESTAMPTZ,
    next_visible_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    last_error TEXT,
    result JSONB,

    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_processing_queue_claimable
    ON processing_queue (flow_kind, status, next_visible_at, created_at, id);

CREATE INDEX IF NOT EXISTS idx_processing_queue_lease
    ON processing_queue (lease_expires_at)
    WHERE status IN ('claimed', 'processing') AND lease_expires_at IS NOT NULL;
"#;
