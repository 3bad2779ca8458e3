//! Background Expiry Sweeper
//!
//! Lazy expiry alone leaks memory: a key that expires and is never read
//! again would sit in its shard forever. The sweeper closes that gap by
//! scanning the keyspace once per second and removing entries whose
//! expiration has passed.
//!
//! The sweeper is a best-effort reclaimer. Read correctness never depends
//! on it; the keyspace's lazy checks already treat expired entries as
//! absent.

use crate::storage::Keyspace;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Fixed interval between sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the running sweeper task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl Sweeper {
    /// Spawns the sweeper over `keyspace` and returns its handle.
    pub fn start(keyspace: Arc<Keyspace>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweep_loop(keyspace, shutdown_rx));
        info!("expiry sweeper started");
        Self { shutdown_tx }
    }

    /// Stops the sweeper task. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(keyspace: Arc<Keyspace>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reclaimed = keyspace.remove_expired();
                if reclaimed > 0 {
                    debug!(reclaimed, remaining = keyspace.len(), "expired keys reclaimed");
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("expiry sweeper stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_reclaims_expired_keys() {
        let keyspace = Arc::new(Keyspace::new());
        for i in 0..10 {
            keyspace.set_with_ttl(&format!("key{i}"), "value", Duration::from_millis(100));
        }
        keyspace.set("persistent", "value");
        assert_eq!(keyspace.len(), 11);

        // The first tick fires immediately and sees nothing expired; the
        // second, one interval later, reclaims the lot.
        let _sweeper = Sweeper::start(Arc::clone(&keyspace));
        tokio::time::sleep(SWEEP_INTERVAL + Duration::from_millis(300)).await;

        assert_eq!(keyspace.len(), 1);
        assert_eq!(keyspace.get("persistent"), Some("value".to_string()));
    }

    #[tokio::test]
    async fn sweeper_stops_on_drop() {
        let keyspace = Arc::new(Keyspace::new());
        {
            let _sweeper = Sweeper::start(Arc::clone(&keyspace));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        keyspace.set_with_ttl("key", "value", Duration::from_millis(50));
        tokio::time::sleep(SWEEP_INTERVAL + Duration::from_millis(300)).await;

        // The sweeper is gone, so the entry is still sitting in its shard,
        // but reads must still see it as absent.
        assert_eq!(keyspace.len(), 1);
        assert_eq!(keyspace.get("key"), None);
    }
}
