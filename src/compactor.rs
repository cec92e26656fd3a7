use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = maybe_compact(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// Compact if the log has grown by at least `threshold` appends. Returns whether it did.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compactor: {appends} appends since last compaction, threshold {threshold}");
        return Ok(false);
    }
    engine.compact_wal().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Schedule;
    use crate::model::BookingRequest;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn request(start: &str) -> BookingRequest {
        BookingRequest {
            resource: "Campo 1".into(),
            start: start.into(),
            duration_minutes: 60,
            holder_name: "Giulia".into(),
            contact: None,
            note: None,
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let engine = Engine::new(test_wal_path("threshold.wal"), Schedule::default()).unwrap();
        for start in ["2026-07-15T08:00", "2026-07-15T09:00", "2026-07-15T10:00"] {
            engine.book_reservation(request(start)).await.unwrap();
        }

        assert!(!maybe_compact(&engine, 4).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 3);

        assert!(maybe_compact(&engine, 3).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.reservations_for("Campo 1").await.unwrap().len(), 3);
    }
}
