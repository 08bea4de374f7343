//! Background tasks: stale-transfer sweep and liveness pings.

use std::sync::Arc;
use std::time::Duration;
use sync_engine::{SyncEngine, Transport};
use tokio::time::interval;

/// Spawn a task that abandons idle incoming transfers every `period`.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_sweep_task<T>(
    engine: Arc<SyncEngine<T>>,
    period: Duration,
) -> tokio::task::JoinHandle<()>
where
    T: Transport + 'static,
{
    tokio::spawn(async move {
        tracing::info!("Transfer sweep started (interval: {:?})", period);
        let mut timer = interval(period);

        loop {
            timer.tick().await;

            let abandoned = engine.sweep_stale_transfers().await;
            if abandoned > 0 {
                tracing::info!("Sweep: abandoned {} stale transfers", abandoned);
            } else {
                tracing::debug!("Sweep: no stale transfers");
            }
        }
    })
}

/// Spawn a task that pings every authorized peer every `period`.
pub fn spawn_ping_task<T>(engine: Arc<SyncEngine<T>>, period: Duration) -> tokio::task::JoinHandle<()>
where
    T: Transport + 'static,
{
    tokio::spawn(async move {
        let mut timer = interval(period);
        // The first tick completes immediately; peers get a handshake on discovery instead.
        timer.tick().await;

        loop {
            timer.tick().await;

            match engine.ping_peers().await {
                Ok(report) if !report.failed.is_empty() => {
                    tracing::debug!(failed = ?report.failed, "Ping: some peers unreachable");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Ping error: {}", e);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::DaemonStores;
    use sync_core::PeerDirectory;
    use sync_engine::{Collaborators, EngineConfig, MockTransport, SyncKey, SyncSecret};
    use sync_types::{FileHeader, FileId, Payload, SyncEnvelope};

    fn key() -> SyncKey {
        SyncKey::from_secret(&SyncSecret::from_bytes([3; 32])).unwrap()
    }

    fn engine(
        downloads: &std::path::Path,
        stale_after: Duration,
        discovered: bool,
    ) -> (Arc<SyncEngine<MockTransport>>, MockTransport) {
        let mut config = EngineConfig::new("Desk", downloads);
        config.stale_after = stale_after;
        let directory = Arc::new(PeerDirectory::with_allow_list(["Laptop"]));
        if discovered {
            directory.upsert(
                "Laptop",
                vec!["127.0.0.1:5566".parse().unwrap()],
                std::time::Instant::now(),
            );
        }
        let transport = MockTransport::new();
        let engine = SyncEngine::new(
            config,
            key(),
            directory,
            transport.clone(),
            Collaborators::from_single(Arc::new(DaemonStores::new(10))),
        );
        (Arc::new(engine), transport)
    }

    #[tokio::test]
    async fn sweep_task_abandons_stale_transfers() {
        let downloads = tempfile::tempdir().unwrap();
        let (engine, _) = engine(downloads.path(), Duration::ZERO, false);

        let file_id = FileId::new();
        let header = SyncEnvelope::new(
            "Laptop",
            None,
            Payload::FileHeader(FileHeader {
                file_id,
                file_name: "a.txt".into(),
                file_size: 10,
            }),
        );
        let frame = key().encrypt(&header.to_json().unwrap()).unwrap();
        engine.handle_frame(&frame).await;
        assert!(engine.is_receiving(&file_id).await);

        let handle = spawn_sweep_task(Arc::clone(&engine), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(!engine.is_receiving(&file_id).await);
        assert!(!downloads.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn ping_task_pings_authorized_peers() {
        let downloads = tempfile::tempdir().unwrap();
        let (engine, transport) = engine(downloads.path(), Duration::from_secs(300), true);

        let handle = spawn_ping_task(Arc::clone(&engine), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(!transport.frames_to("Laptop").is_empty());
    }
}
