//! World Configuration
//!
//! Construction-time options for the world plus the journal's keyframe
//! settings. Defaults match a fresh prototype world; `from_env` overlays
//! environment variables for deployments. [`ServerConfig`] carries the
//! transport settings.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::TILE_SIZE;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that does not parse.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// Keyframe interval must be positive.
    #[error("KEYFRAME_INTERVAL_TICKS must be > 0")]
    ZeroKeyframeInterval,
}

/// Keyframe ring and resync settings for the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Maximum stored keyframes (`KEYFRAME_JOURNAL_CAPACITY`).
    pub keyframe_capacity: usize,
    /// Maximum keyframe age in milliseconds (`KEYFRAME_JOURNAL_MAX_AGE_MS`).
    pub keyframe_max_age_ms: u64,
    /// Ticks between keyframes (`KEYFRAME_INTERVAL_TICKS`).
    pub keyframe_interval_ticks: u64,
    /// Unknown-ID updates tolerated before the resync hint is raised.
    pub unknown_update_resync_threshold: u32,
    /// Patch frames retained for keyframe catch-up.
    pub frame_history: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            keyframe_capacity: 8,
            keyframe_max_age_ms: 5000,
            keyframe_interval_ticks: 15,
            unknown_update_resync_threshold: 1,
            frame_history: 256,
        }
    }
}

/// World construction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Root RNG seed.
    pub seed: String,
    /// World width in tiles.
    pub width: f64,
    /// World height in tiles.
    pub height: f64,
    /// Generate rock obstacles.
    pub obstacles: bool,
    /// Number of rock obstacles.
    pub obstacles_count: u32,
    /// Generate gold-ore obstacles.
    pub gold_mines: bool,
    /// Number of gold-ore obstacles.
    pub gold_mine_count: u32,
    /// Seed NPCs.
    pub npcs: bool,
    /// Number of goblins.
    pub goblin_count: u32,
    /// Number of rats.
    pub rat_count: u32,
    /// Generate lava pools.
    pub lava: bool,
    /// Number of lava pools.
    pub lava_count: u32,
    /// Keyframe settings.
    pub journal: JournalConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: "prototype".to_string(),
            width: 100.0,
            height: 100.0,
            obstacles: true,
            obstacles_count: 24,
            gold_mines: true,
            gold_mine_count: 6,
            npcs: true,
            goblin_count: 4,
            rat_count: 6,
            lava: true,
            lava_count: 4,
            journal: JournalConfig::default(),
        }
    }
}

impl WorldConfig {
    /// An empty world of the given size: no obstacles, no NPCs.
    pub fn empty(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            obstacles: false,
            gold_mines: false,
            npcs: false,
            lava: false,
            ..Self::default()
        }
    }

    /// Total NPCs seeded at construction.
    pub fn npc_count(&self) -> u32 {
        if !self.npcs {
            return 0;
        }
        self.goblin_count + self.rat_count
    }

    /// World width in world units.
    pub fn width_units(&self) -> f64 {
        self.width * TILE_SIZE
    }

    /// World height in world units.
    pub fn height_units(&self) -> f64 {
        self.height * TILE_SIZE
    }

    /// Build from defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from defaults overlaid with values from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(seed) = lookup("EMBERFALL_SEED") {
            config.seed = seed;
        }
        if let Some(v) = lookup("EMBERFALL_WIDTH") {
            config.width = parse_dimension("EMBERFALL_WIDTH", &v)?;
        }
        if let Some(v) = lookup("EMBERFALL_HEIGHT") {
            config.height = parse_dimension("EMBERFALL_HEIGHT", &v)?;
        }

        if let Some(v) = lookup("EMBERFALL_OBSTACLES") {
            config.obstacles = parse_bool("EMBERFALL_OBSTACLES", &v)?;
        }
        if let Some(v) = lookup("EMBERFALL_OBSTACLES_COUNT") {
            config.obstacles_count = parse_count("EMBERFALL_OBSTACLES_COUNT", &v)?;
        }
        if let Some(v) = lookup("EMBERFALL_GOLD_MINES") {
            config.gold_mines = parse_bool("EMBERFALL_GOLD_MINES", &v)?;
        }
        if let Some(v) = lookup("EMBERFALL_GOLD_MINE_COUNT") {
            config.gold_mine_count = parse_count("EMBERFALL_GOLD_MINE_COUNT", &v)?;
        }
        if let Some(v) = lookup("EMBERFALL_NPCS") {
            config.npcs = parse_bool("EMBERFALL_NPCS", &v)?;
        }
        if let Some(v) = lookup("EMBERFALL_GOBLIN_COUNT") {
            config.goblin_count = parse_count("EMBERFALL_GOBLIN_COUNT", &v)?;
        }
        if let Some(v) = lookup("EMBERFALL_RAT_COUNT") {
            config.rat_count = parse_count("EMBERFALL_RAT_COUNT", &v)?;
        }
        if let Some(v) = lookup("EMBERFALL_LAVA") {
            config.lava = parse_bool("EMBERFALL_LAVA", &v)?;
        }
        if let Some(v) = lookup("EMBERFALL_LAVA_COUNT") {
            config.lava_count = parse_count("EMBERFALL_LAVA_COUNT", &v)?;
        }

        if let Some(v) = lookup("KEYFRAME_JOURNAL_CAPACITY") {
            config.journal.keyframe_capacity =
                parse_count("KEYFRAME_JOURNAL_CAPACITY", &v)? as usize;
        }
        if let Some(v) = lookup("KEYFRAME_JOURNAL_MAX_AGE_MS") {
            config.journal.keyframe_max_age_ms =
                parse_count("KEYFRAME_JOURNAL_MAX_AGE_MS", &v)? as u64;
        }
        if let Some(v) = lookup("KEYFRAME_INTERVAL_TICKS") {
            let ticks = parse_count("KEYFRAME_INTERVAL_TICKS", &v)?;
            if ticks == 0 {
                return Err(ConfigError::ZeroKeyframeInterval);
            }
            config.journal.keyframe_interval_ticks = ticks as u64;
        }

        Ok(config)
    }
}

/// Parse a signed count, clamping negatives to 0.
fn parse_count(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    let parsed: i64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })?;
    Ok(parsed.clamp(0, u32::MAX as i64) as u32)
}

/// Transport settings for the WebSocket adaptor.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (`EMBERFALL_BIND`).
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Time a new connection has to send its join.
    pub join_timeout: Duration,
    /// Per-subscriber outbound queue capacity, in messages.
    pub outbound_capacity: usize,
    /// Capacity of the session's inbound command channel.
    pub inbound_capacity: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 256,
            join_timeout: Duration::from_secs(10),
            outbound_capacity: 64,
            inbound_capacity: 1024,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Build from defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from defaults overlaid with values from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup("EMBERFALL_BIND") {
            config.bind_addr = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "EMBERFALL_BIND",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("EMBERFALL_MAX_CONNECTIONS") {
            config.max_connections = parse_count("EMBERFALL_MAX_CONNECTIONS", &v)? as usize;
        }
        Ok(config)
    }
}

fn parse_dimension(key: &'static str, value: &str) -> Result<f64, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = WorldConfig::default();
        assert_eq!(config.seed, "prototype");
        assert_eq!(config.width, 100.0);
        assert_eq!(config.journal.keyframe_capacity, 8);
        assert_eq!(config.journal.keyframe_max_age_ms, 5000);
        assert_eq!(config.npc_count(), config.goblin_count + config.rat_count);
    }

    #[test]
    fn test_negative_counts_clamp() {
        let config = WorldConfig::from_lookup(lookup_from(&[
            ("EMBERFALL_GOBLIN_COUNT", "-3"),
            ("EMBERFALL_RAT_COUNT", "2"),
        ]))
        .unwrap();
        assert_eq!(config.goblin_count, 0);
        assert_eq!(config.rat_count, 2);
        assert_eq!(config.npc_count(), 2);
    }

    #[test]
    fn test_npcs_disabled() {
        let config = WorldConfig::from_lookup(lookup_from(&[("EMBERFALL_NPCS", "false")])).unwrap();
        assert_eq!(config.npc_count(), 0);
    }

    #[test]
    fn test_invalid_value() {
        let err = WorldConfig::from_lookup(lookup_from(&[("EMBERFALL_WIDTH", "wide")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "EMBERFALL_WIDTH", .. }));
    }

    #[test]
    fn test_keyframe_settings() {
        let config = WorldConfig::from_lookup(lookup_from(&[
            ("KEYFRAME_JOURNAL_CAPACITY", "0"),
            ("KEYFRAME_JOURNAL_MAX_AGE_MS", "-1"),
            ("KEYFRAME_INTERVAL_TICKS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.journal.keyframe_capacity, 0);
        assert_eq!(config.journal.keyframe_max_age_ms, 0);
        assert_eq!(config.journal.keyframe_interval_ticks, 30);

        let err = WorldConfig::from_lookup(lookup_from(&[("KEYFRAME_INTERVAL_TICKS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroKeyframeInterval));
    }

    #[test]
    fn test_server_config() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("EMBERFALL_BIND", "127.0.0.1:9001"),
            ("EMBERFALL_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9001);
        assert_eq!(config.max_connections, 4);

        let err = ServerConfig::from_lookup(lookup_from(&[("EMBERFALL_BIND", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "EMBERFALL_BIND", .. }));
    }

    #[test]
    fn test_world_units() {
        let config = WorldConfig::empty(100.0, 50.0);
        assert_eq!(config.width_units(), 4000.0);
        assert_eq!(config.height_units(), 2000.0);
        assert_eq!(config.npc_count(), 0);
    }
}
