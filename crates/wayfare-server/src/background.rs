//! Background tasks for the Wayfare server.
//!
//! Includes:
//! - Periodic logging of room registry gauges.

use crate::registry::RoomRegistry;
use crate::AppState;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Point-in-time size of the room registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryGauges {
    pub rooms: usize,
    pub connections: usize,
}

impl RegistryGauges {
    pub fn sample(registry: &RoomRegistry) -> Self {
        Self {
            rooms: registry.room_count(),
            connections: registry.connection_count(),
        }
    }
}

/// Starts the registry gauge task.
///
/// Runs indefinitely, logging the number of open rooms and live connections
/// every `interval_seconds`.
pub async fn start_gauge_task(state: Arc<AppState>, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::warn!("registry gauge task disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting registry gauge task");

    loop {
        sleep(interval).await;
        let gauges = RegistryGauges::sample(&state.registry);
        tracing::debug!(
            rooms = gauges.rooms,
            connections = gauges.connections,
            "trip chat registry gauges"
        );
    }
}
