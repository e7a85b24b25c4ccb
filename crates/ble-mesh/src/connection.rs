//! Live peer connection tracking and broadcast fan-out

use crate::adapter::BleAdapter;
use crate::error::{MeshError, MeshResult};
use chrono::{DateTime, Utc};
use shared::MeshConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Opaque radio address of a peer device
pub type PeerId = String;

/// Which side of the link this device plays for a given peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Central,
    Peripheral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Closed,
}

/// One live (or in-progress) link to a peer
#[derive(Debug, Clone)]
pub struct Connection {
    pub peer: PeerId,
    pub role: ConnectionRole,
    pub state: ConnectionState,
    pub established_at: DateTime<Utc>,
}

/// Configuration for connection retry logic
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn from_mesh_config(config: &MeshConfig) -> Self {
        Self {
            max_retries: config.connect_max_retries,
            initial_backoff_ms: config.connect_backoff_initial_ms,
            max_backoff_ms: config.connect_backoff_max_ms,
        }
    }
}

/// Owns the set of peer links and the only write path to them
///
/// The routing engine never sees radio handles; it sees this manager's
/// broadcast and count operations. Exactly one link is kept per peer pair:
/// when both devices attempt to connect simultaneously, the device with the
/// lexicographically higher address takes the Central role and initiates,
/// the other side keeps its Peripheral link and never dials out.
pub struct ConnectionManager {
    local_peer_id: PeerId,
    adapter: Arc<dyn BleAdapter>,
    connections: Arc<RwLock<HashMap<PeerId, Connection>>>,
    retry: RetryConfig,
    max_peers: usize,
}

impl ConnectionManager {
    pub fn new(local_peer_id: PeerId, adapter: Arc<dyn BleAdapter>, config: &MeshConfig) -> Self {
        Self {
            local_peer_id,
            adapter,
            connections: Arc::new(RwLock::new(HashMap::new())),
            retry: RetryConfig::from_mesh_config(config),
            max_peers: config.max_peer_connections,
        }
    }

    /// Decide deterministically which side dials for a discovered peer pair
    pub fn resolve_role(&self, peer: &PeerId) -> ConnectionRole {
        if self.local_peer_id.as_str() > peer.as_str() {
            ConnectionRole::Central
        } else {
            ConnectionRole::Peripheral
        }
    }

    /// Establish a link to a discovered peer, if this side should dial
    ///
    /// Peripheral-role peers are registered as Connecting and become Ready
    /// when the inbound link lands via `peer_connected`. Central-role peers
    /// are dialed with exponential backoff; a peer that exhausts its retry
    /// budget is abandoned until rediscovered.
    pub async fn establish(&self, peer: PeerId) -> MeshResult<()> {
        {
            let connections = self.connections.read().await;
            if let Some(existing) = connections.get(&peer) {
                if existing.state != ConnectionState::Closed {
                    debug!("Connection to {} already {:?}", peer, existing.state);
                    return Ok(());
                }
            }
            let live = connections
                .values()
                .filter(|c| c.state != ConnectionState::Closed)
                .count();
            if live >= self.max_peers {
                debug!("Peer limit {} reached, skipping {}", self.max_peers, peer);
                return Ok(());
            }
        }

        let role = self.resolve_role(&peer);
        self.set_state(&peer, role, ConnectionState::Connecting).await;

        if role == ConnectionRole::Peripheral {
            debug!("Waiting for inbound link from higher-address peer {}", peer);
            return Ok(());
        }

        match self.connect_with_retry(&peer).await {
            Ok(()) => {
                self.set_state(&peer, role, ConnectionState::Ready).await;
                info!("Connection to {} ready ({:?})", peer, role);
                Ok(())
            }
            Err(e) => {
                warn!("Abandoning peer {} until rediscovery: {}", peer, e);
                self.remove(&peer).await;
                Err(e)
            }
        }
    }

    async fn connect_with_retry(&self, peer: &PeerId) -> MeshResult<()> {
        let mut attempt = 0;
        let mut backoff_ms = self.retry.initial_backoff_ms;

        loop {
            attempt += 1;
            debug!("Connection attempt {} for peer {}", attempt, peer);

            match self.adapter.connect(peer).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt >= self.retry.max_retries {
                        return Err(MeshError::ConnectionFailed(format!(
                            "Failed after {} attempts: {}",
                            attempt, e
                        )));
                    }

                    warn!(
                        "Connection attempt {} failed for peer {}: {}. Retrying in {}ms",
                        attempt, peer, e, backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(self.retry.max_backoff_ms);
                }
            }
        }
    }

    /// An inbound link from `peer` became usable
    pub async fn peer_connected(&self, peer: PeerId) {
        let role = self.resolve_role(&peer);
        self.set_state(&peer, role, ConnectionState::Ready).await;
        info!("Connection to {} ready ({:?})", peer, role);
    }

    /// The link to `peer` was torn down (explicit close, radio error, out of range)
    pub async fn peer_disconnected(&self, peer: &PeerId) {
        self.remove(peer).await;
        info!("Connection to {} closed", peer);
    }

    /// Write a frame to every Ready connection except an optional source
    ///
    /// Per-peer failures are tolerated: the failing link is torn down and
    /// the rest of the broadcast proceeds. Returns the number of peers the
    /// frame was written to.
    pub async fn broadcast_frame(&self, frame: &[u8], except: Option<&PeerId>) -> usize {
        let targets: Vec<PeerId> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|c| c.state == ConnectionState::Ready)
                .filter(|c| except != Some(&c.peer))
                .map(|c| c.peer.clone())
                .collect()
        };

        if targets.is_empty() {
            debug!("No ready peers for broadcast");
            return 0;
        }

        let mut written = 0;
        for peer in targets {
            match self.adapter.send_data(&peer, frame).await {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!("Failed to write to peer {}: {}", peer, e);
                    self.peer_disconnected(&peer).await;
                }
            }
        }
        written
    }

    /// Number of currently Ready connections
    pub async fn ready_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.state == ConnectionState::Ready)
            .count()
    }

    pub async fn ready_peers(&self) -> Vec<PeerId> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.state == ConnectionState::Ready)
            .map(|c| c.peer.clone())
            .collect()
    }

    /// Periodically fold newly discovered advertisers into the live set
    ///
    /// One logical worker per device; connection handling itself stays
    /// per-peer so a stalled dial cannot block the cycle for long.
    pub async fn run_discovery_cycle(&self) -> MeshResult<()> {
        let discovered = self.adapter.discovered_peers().await?;

        for peer in discovered {
            if peer == self.local_peer_id {
                continue;
            }
            // Dial failures are peer-local; keep cycling
            if let Err(e) = self.establish(peer.clone()).await {
                debug!("Discovery-driven dial to {} failed: {}", peer, e);
            }
        }
        Ok(())
    }

    async fn set_state(&self, peer: &PeerId, role: ConnectionRole, state: ConnectionState) {
        let mut connections = self.connections.write().await;
        connections
            .entry(peer.clone())
            .and_modify(|c| {
                c.state = state;
                c.role = role;
            })
            .or_insert_with(|| Connection {
                peer: peer.clone(),
                role,
                state,
                established_at: Utc::now(),
            });
    }

    async fn remove(&self, peer: &PeerId) {
        let mut connections = self.connections.write().await;
        if let Some(c) = connections.get_mut(peer) {
            c.state = ConnectionState::Closed;
        }
        connections.retain(|_, c| c.state != ConnectionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::MockAdapter;

    fn manager_with(local: &str, adapter: Arc<MockAdapter>) -> ConnectionManager {
        ConnectionManager::new(local.to_string(), adapter, &MeshConfig::default())
    }

    #[tokio::test]
    async fn test_role_resolution_is_deterministic() {
        let adapter = Arc::new(MockAdapter::new());
        let high = manager_with("BB:BB", adapter.clone());
        let low = manager_with("AA:AA", adapter);

        assert_eq!(high.resolve_role(&"AA:AA".to_string()), ConnectionRole::Central);
        assert_eq!(low.resolve_role(&"BB:BB".to_string()), ConnectionRole::Peripheral);
    }

    #[tokio::test]
    async fn test_central_side_dials_and_becomes_ready() {
        let adapter = Arc::new(MockAdapter::new());
        let manager = manager_with("BB:BB", adapter.clone());

        manager.establish("AA:AA".to_string()).await.unwrap();

        assert_eq!(manager.ready_count().await, 1);
        assert_eq!(adapter.connect_calls().await, vec!["AA:AA".to_string()]);
    }

    #[tokio::test]
    async fn test_peripheral_side_waits_for_inbound() {
        let adapter = Arc::new(MockAdapter::new());
        let manager = manager_with("AA:AA", adapter.clone());

        manager.establish("BB:BB".to_string()).await.unwrap();

        // No dial-out, not ready yet
        assert!(adapter.connect_calls().await.is_empty());
        assert_eq!(manager.ready_count().await, 0);

        manager.peer_connected("BB:BB".to_string()).await;
        assert_eq!(manager.ready_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_establish_keeps_single_link() {
        let adapter = Arc::new(MockAdapter::new());
        let manager = manager_with("BB:BB", adapter.clone());

        manager.establish("AA:AA".to_string()).await.unwrap();
        manager.establish("AA:AA".to_string()).await.unwrap();

        assert_eq!(manager.ready_count().await, 1);
        assert_eq!(adapter.connect_calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_skips_source_connection() {
        let adapter = Arc::new(MockAdapter::new());
        let manager = manager_with("ZZ:ZZ", adapter.clone());

        manager.establish("AA:AA".to_string()).await.unwrap();
        manager.establish("BB:BB".to_string()).await.unwrap();

        let source = "AA:AA".to_string();
        let written = manager.broadcast_frame(b"frame", Some(&source)).await;

        assert_eq!(written, 1);
        let sends = adapter.sent_frames().await;
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, "BB:BB");
    }

    #[tokio::test]
    async fn test_broadcast_survives_single_peer_failure() {
        let adapter = Arc::new(MockAdapter::new());
        let manager = manager_with("ZZ:ZZ", adapter.clone());

        manager.establish("AA:AA".to_string()).await.unwrap();
        manager.establish("BB:BB".to_string()).await.unwrap();
        adapter.fail_sends_to("AA:AA").await;

        let written = manager.broadcast_frame(b"frame", None).await;

        // The failing link is torn down, the other write goes through
        assert_eq!(written, 1);
        assert_eq!(manager.ready_count().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_peer_from_live_set() {
        let adapter = Arc::new(MockAdapter::new());
        let manager = manager_with("ZZ:ZZ", adapter);

        manager.establish("AA:AA".to_string()).await.unwrap();
        assert_eq!(manager.ready_count().await, 1);

        manager.peer_disconnected(&"AA:AA".to_string()).await;
        assert_eq!(manager.ready_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_dial_abandons_peer() {
        let adapter = Arc::new(MockAdapter::new());
        adapter.fail_connects_to("AA:AA").await;
        let mut config = MeshConfig::default();
        config.connect_max_retries = 2;
        config.connect_backoff_initial_ms = 1;
        let manager = ConnectionManager::new("BB:BB".to_string(), adapter.clone(), &config);

        let result = manager.establish("AA:AA".to_string()).await;

        assert!(matches!(result, Err(MeshError::ConnectionFailed(_))));
        assert_eq!(manager.ready_count().await, 0);
        assert_eq!(adapter.connect_calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_peer_limit_enforced() {
        let adapter = Arc::new(MockAdapter::new());
        let mut config = MeshConfig::default();
        config.max_peer_connections = 2;
        let manager = ConnectionManager::new("ZZ:ZZ".to_string(), adapter, &config);

        manager.establish("AA:01".to_string()).await.unwrap();
        manager.establish("AA:02".to_string()).await.unwrap();
        manager.establish("AA:03".to_string()).await.unwrap();

        assert_eq!(manager.ready_count().await, 2);
    }
}
