//! Structured observability hooks for record lifecycle events.
//!
//! This module provides:
//! - Record-scoped tracing spans via the `RecordSpan` RAII guard
//! - Emission functions for key events: upsert, tombstone, merge passes
//!
//! Events are emitted at `info!` level; per-field conflict detail is
//! `debug!`. For JSON output, initialise via `telemetry::init_tracing`.

use tracing::{debug, info};

/// RAII guard that enters a record-scoped tracing span.
pub struct RecordSpan {
    _span: tracing::span::EnteredSpan,
}

impl RecordSpan {
    /// Create and enter a span tagged with the record id.
    pub fn enter(record_id: &str) -> Self {
        let span = tracing::info_span!("fieldnote.record", record_id = %record_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a new revision was written for a record.
pub fn emit_record_upserted(record_id: &str, revision_id: &str, is_update: bool) {
    info!(
        event = "record.upserted",
        record_id = %record_id,
        revision_id = %revision_id,
        is_update = is_update,
    );
}

/// Emit event: a tombstone (or undelete) revision was written.
pub fn emit_record_tombstoned(record_id: &str, revision_id: &str, deleted: bool) {
    info!(
        event = "record.tombstoned",
        record_id = %record_id,
        revision_id = %revision_id,
        deleted = deleted,
    );
}

/// Emit event: one merge pass completed.
pub fn emit_merge_pass(record_id: &str, heads_before: usize, heads_after: usize, merges: usize) {
    info!(
        event = "merge.pass",
        record_id = %record_id,
        heads_before = heads_before,
        heads_after = heads_after,
        merges = merges,
    );
}

/// Emit event: a clean pair of heads produced a merge revision.
pub fn emit_merge_revision_created(
    record_id: &str,
    revision_id: &str,
    parent_a: &str,
    parent_b: &str,
    deleted: bool,
) {
    info!(
        event = "merge.revision_created",
        record_id = %record_id,
        revision_id = %revision_id,
        parent_a = %parent_a,
        parent_b = %parent_b,
        deleted = deleted,
    );
}

/// Emit event: the record converged to at most one head.
pub fn emit_merge_converged(record_id: &str, heads: usize) {
    info!(event = "merge.converged", record_id = %record_id, heads = heads);
}

/// Emit event: a field changed differently on two heads (debug level;
/// a true conflict is a designed terminal state, not an error).
pub fn emit_merge_conflict(record_id: &str, field: &str, head_a: &str, head_b: &str) {
    debug!(
        event = "merge.conflict",
        record_id = %record_id,
        field = %field,
        head_a = %head_a,
        head_b = %head_b,
    );
}
