use std::sync::Arc;

use tracing::debug;

use crate::engine::Engine;

/// Rewrites the WAL as a snapshot once `threshold` events have been appended
/// since the last compaction. Runs only when writes land; there is no timer.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    if threshold == 0 {
        debug!("wal compaction disabled");
        return;
    }
    loop {
        engine.wait_for_writes().await;
        engine.compact_if_needed(threshold).await;
    }
}
