use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mesh: MeshConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    /// Initial TTL value for originated envelopes (default: 7)
    pub message_ttl: u8,
    /// Maximum number of entries in the seen-envelope cache (default: 10000)
    pub seen_cache_size: usize,
    /// Expiration time for seen-envelope entries in seconds (default: 300 = 5 minutes)
    pub seen_expiration_secs: u64,
    /// Maximum number of peer connections per device (default: 10)
    pub max_peer_connections: usize,
    /// Initial backoff for failed connection attempts in milliseconds (default: 100)
    pub connect_backoff_initial_ms: u64,
    /// Backoff ceiling for failed connection attempts in milliseconds (default: 5000)
    pub connect_backoff_max_ms: u64,
    /// Connection attempts before a peer is abandoned until rediscovery (default: 5)
    pub connect_max_retries: u32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            message_ttl: 7,
            seen_cache_size: 10_000,
            seen_expiration_secs: 300,
            max_peer_connections: 10,
            connect_backoff_initial_ms: 100,
            connect_backoff_max_ms: 5_000,
            connect_max_retries: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            mesh: MeshConfig {
                message_ttl: env::var("MESH_MESSAGE_TTL")
                    .unwrap_or_else(|_| "7".to_string())
                    .parse()?,
                seen_cache_size: env::var("MESH_SEEN_CACHE_SIZE")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()?,
                seen_expiration_secs: env::var("MESH_SEEN_EXPIRATION_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()?,
                max_peer_connections: env::var("MESH_MAX_PEER_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                connect_backoff_initial_ms: env::var("MESH_CONNECT_BACKOFF_INITIAL_MS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
                connect_backoff_max_ms: env::var("MESH_CONNECT_BACKOFF_MAX_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()?,
                connect_max_retries: env::var("MESH_CONNECT_MAX_RETRIES")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mesh_config() {
        let config = MeshConfig::default();
        assert_eq!(config.message_ttl, 7);
        assert_eq!(config.seen_cache_size, 10_000);
        assert_eq!(config.seen_expiration_secs, 300);
        assert_eq!(config.max_peer_connections, 10);
    }

    #[test]
    fn test_from_env_uses_defaults() {
        let config = Config::from_env().expect("config should load with defaults");
        assert_eq!(config.mesh.message_ttl, MeshConfig::default().message_ttl);
        assert_eq!(
            config.mesh.connect_max_retries,
            MeshConfig::default().connect_max_retries
        );
    }
}
