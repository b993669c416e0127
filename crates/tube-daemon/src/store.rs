use std::sync::Arc;

use tokio::sync::RwLock;
use tube_core::protocol::PlayerSnapshot;

/// Latest published snapshot, shared read-only with the socket and HTTP
/// servers.  Only the core loop publishes.
#[derive(Default)]
pub struct SnapshotStore {
    state: Arc<RwLock<PlayerSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_state(&self) -> PlayerSnapshot {
        self.state.read().await.clone()
    }

    /// Store `snapshot` if it differs from the current one, bumping `rev`.
    /// Returns whether anything changed.
    pub async fn publish(&self, mut snapshot: PlayerSnapshot) -> bool {
        let mut state = self.state.write().await;
        snapshot.rev = state.rev;
        if *state == snapshot {
            return false;
        }
        snapshot.rev = state.rev + 1;
        *state = snapshot;
        true
    }
}
