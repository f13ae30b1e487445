use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::badges::{default_badge_definitions, validate_badge_definitions, BadgeDefinition};
use crate::error::{TrustError, TrustResult};
use crate::vouch::VouchType;

/// Configuration for the trust engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Vouch weight shares used by the score engine
    pub scoring: ScoringConfig,
    /// Tiered badge definitions
    pub badges: Vec<BadgeDefinition>,
    /// Read cache configuration
    pub cache: CacheConfig,
    /// Bounds on collaborator reads
    pub timeouts: TimeoutConfig,
    /// Inactivity warning and decay windows
    pub inactivity: InactivityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses in-memory store)
    pub postgres_enabled: bool,
    /// Pool size
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Emit span open/close events
    pub log_spans: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: VouchWeights,
}

/// Share of the vouches component each vouch type can earn, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VouchWeights {
    pub primary: f64,
    pub secondary: f64,
    pub community: f64,
}

impl Default for VouchWeights {
    fn default() -> Self {
        Self {
            primary: 30.0,
            secondary: 30.0,
            community: 40.0,
        }
    }
}

impl VouchWeights {
    pub fn for_type(&self, vouch_type: VouchType) -> f64 {
        match vouch_type {
            VouchType::Primary => self.primary,
            VouchType::Secondary => self.secondary,
            VouchType::Community => self.community,
        }
    }

    /// Weight carried by a single vouch occupying one slot of `vouch_type`
    pub fn per_slot(&self, vouch_type: VouchType) -> f64 {
        self.for_type(vouch_type) / vouch_type.max_slots() as f64
    }

    pub fn validate(&self) -> TrustResult<()> {
        for vouch_type in VouchType::ALL {
            let weight = self.for_type(vouch_type);
            if !(0.0..=100.0).contains(&weight) {
                return Err(TrustError::Validation(format!(
                    "{} weight must be within 0-100, got {}",
                    vouch_type, weight
                )));
            }
        }

        let total = self.primary + self.secondary + self.community;
        if (total - 100.0).abs() > 1e-6 {
            return Err(TrustError::Validation(format!(
                "Vouch weights must sum to 100, got {}",
                total
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Freshness window for badge and leaderboard reads
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound for a badge or leaderboard computation
    pub read_timeout_ms: u64,
}

impl TimeoutConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InactivityConfig {
    /// Days without activity before a warning is produced
    pub warning_start_days: i64,
    /// Days without activity after which decay may apply
    pub decay_start_days: i64,
    /// Period of the daemon's inactivity sweep
    pub sweep_interval_secs: u64,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            warning_start_days: 23,
            decay_start_days: 30,
            sweep_interval_secs: 3600,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/trust_engine".to_string(),
            postgres_enabled: false,
            max_connections: 10,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                log_spans: false,
            },
            scoring: ScoringConfig::default(),
            badges: default_badge_definitions(),
            cache: CacheConfig { ttl_secs: 60 },
            timeouts: TimeoutConfig {
                read_timeout_ms: 2_000,
            },
            inactivity: InactivityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup (environment, tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Database configuration
        if let Some(url) = lookup("TRUST_POSTGRES_URL") {
            config.database.postgres_url = url;
        }

        if let Some(enabled) = lookup("TRUST_POSTGRES_ENABLED") {
            config.database.postgres_enabled = enabled
                .parse()
                .context("Invalid TRUST_POSTGRES_ENABLED value")?;
        }

        if let Some(max) = lookup("TRUST_POSTGRES_MAX_CONNECTIONS") {
            config.database.max_connections = max
                .parse()
                .context("Invalid TRUST_POSTGRES_MAX_CONNECTIONS value")?;
        }

        // Logging configuration
        if let Some(level) = lookup("TRUST_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(spans) = lookup("TRUST_LOG_SPANS") {
            config.logging.log_spans = spans.parse().context("Invalid TRUST_LOG_SPANS value")?;
        }

        // Scoring configuration
        if let Some(weight) = lookup("TRUST_WEIGHT_PRIMARY") {
            config.scoring.weights.primary =
                weight.parse().context("Invalid TRUST_WEIGHT_PRIMARY value")?;
        }

        if let Some(weight) = lookup("TRUST_WEIGHT_SECONDARY") {
            config.scoring.weights.secondary = weight
                .parse()
                .context("Invalid TRUST_WEIGHT_SECONDARY value")?;
        }

        if let Some(weight) = lookup("TRUST_WEIGHT_COMMUNITY") {
            config.scoring.weights.community = weight
                .parse()
                .context("Invalid TRUST_WEIGHT_COMMUNITY value")?;
        }

        // Badge definitions replace the defaults wholesale
        if let Some(path) = lookup("TRUST_BADGES_PATH") {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read badge definitions from {}", path))?;
            config.badges = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid badge definitions in {}", path))?;
            info!("Loaded {} badge definition(s) from {}", config.badges.len(), path);
        }

        // Cache and timeouts
        if let Some(ttl) = lookup("TRUST_CACHE_TTL_SECS") {
            config.cache.ttl_secs = ttl.parse().context("Invalid TRUST_CACHE_TTL_SECS value")?;
        }

        if let Some(timeout) = lookup("TRUST_READ_TIMEOUT_MS") {
            config.timeouts.read_timeout_ms = timeout
                .parse()
                .context("Invalid TRUST_READ_TIMEOUT_MS value")?;
        }

        // Inactivity configuration
        if let Some(days) = lookup("TRUST_INACTIVITY_WARNING_DAYS") {
            config.inactivity.warning_start_days = days
                .parse()
                .context("Invalid TRUST_INACTIVITY_WARNING_DAYS value")?;
        }

        if let Some(days) = lookup("TRUST_INACTIVITY_DECAY_DAYS") {
            config.inactivity.decay_start_days = days
                .parse()
                .context("Invalid TRUST_INACTIVITY_DECAY_DAYS value")?;
        }

        if let Some(secs) = lookup("TRUST_SWEEP_INTERVAL_SECS") {
            config.inactivity.sweep_interval_secs = secs
                .parse()
                .context("Invalid TRUST_SWEEP_INTERVAL_SECS value")?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.database.postgres_enabled && self.database.postgres_url.is_empty() {
            return Err(anyhow::anyhow!(
                "PostgreSQL is enabled but no connection string is configured"
            ));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("Pool size must be non-zero"));
        }

        self.scoring.weights.validate()?;
        validate_badge_definitions(&self.badges)?;

        if self.timeouts.read_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Read timeout must be non-zero"));
        }

        if self.inactivity.warning_start_days <= 0
            || self.inactivity.warning_start_days >= self.inactivity.decay_start_days
        {
            return Err(anyhow::anyhow!(
                "Inactivity warning must start after day 0 and before decay (warning {}, decay {})",
                self.inactivity.warning_start_days,
                self.inactivity.decay_start_days
            ));
        }

        if self.inactivity.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("Sweep interval must be non-zero"));
        }

        Ok(())
    }
}

/// Immutable view of the scoring configuration at one version
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub weights: VouchWeights,
    pub badges: Vec<BadgeDefinition>,
    pub loaded_at: DateTime<Utc>,
}

/// Versioned, hot-swappable vouch weights and badge thresholds.
///
/// Readers take a snapshot without locking; a reload validates the new
/// values first and keeps the last-known snapshot when anything is wrong.
pub struct ConfigProvider {
    current: ArcSwap<ConfigSnapshot>,
    next_version: AtomicU64,
}

impl ConfigProvider {
    pub fn new(weights: VouchWeights, badges: Vec<BadgeDefinition>) -> TrustResult<Self> {
        weights.validate()?;
        validate_badge_definitions(&badges)?;

        Ok(Self {
            current: ArcSwap::from_pointee(ConfigSnapshot {
                version: 1,
                weights,
                badges,
                loaded_at: Utc::now(),
            }),
            next_version: AtomicU64::new(2),
        })
    }

    pub fn from_config(config: &EngineConfig) -> TrustResult<Self> {
        Self::new(config.scoring.weights, config.badges.clone())
    }

    /// Current snapshot (lock-free)
    #[inline]
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Validate and atomically install new values, returning the new version
    pub fn replace(&self, weights: VouchWeights, badges: Vec<BadgeDefinition>) -> TrustResult<u64> {
        weights.validate()?;
        validate_badge_definitions(&badges)?;

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        self.current.store(Arc::new(ConfigSnapshot {
            version,
            weights,
            badges,
            loaded_at: Utc::now(),
        }));

        info!(version, "Scoring configuration swapped");
        Ok(version)
    }

    /// Re-read the environment; on any failure the last-known snapshot stays
    pub fn reload_from_env(&self) -> u64 {
        let reloaded = EngineConfig::from_env()
            .map_err(|e| TrustError::Validation(format!("{:#}", e)))
            .and_then(|config| self.replace(config.scoring.weights, config.badges));

        match reloaded {
            Ok(version) => version,
            Err(e) => {
                let version = self.version();
                warn!(
                    error = %e,
                    version,
                    "Configuration reload failed, keeping last-known configuration"
                );
                version
            }
        }
    }
}

/// Mask the password of a connection string for logging
pub fn sanitize_for_logging(data: &str) -> String {
    let Some(scheme_end) = data.find("://") else {
        return data.to_string();
    };
    let rest = &data[scheme_end + 3..];
    let Some(at) = rest.find('@') else {
        return data.to_string();
    };
    let credentials = &rest[..at];

    match credentials.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &data[..scheme_end + 3],
            &credentials[..colon],
            &rest[at..]
        ),
        None => data.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(
            sanitize_for_logging("postgresql://trust:hunter2@db:5432/trust"),
            "postgresql://trust:***@db:5432/trust"
        );
        assert_eq!(
            sanitize_for_logging("postgresql://localhost:5432/trust"),
            "postgresql://localhost:5432/trust"
        );
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("TRUST_WEIGHT_PRIMARY", "40"),
            ("TRUST_WEIGHT_SECONDARY", "20"),
            ("TRUST_CACHE_TTL_SECS", "5"),
            ("TRUST_LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.scoring.weights.primary, 40.0);
        assert_eq!(config.scoring.weights.secondary, 20.0);
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        assert!(EngineConfig::from_lookup(lookup_from(&[("TRUST_POSTGRES_ENABLED", "maybe")])).is_err());
        // weights no longer sum to 100
        assert!(EngineConfig::from_lookup(lookup_from(&[("TRUST_WEIGHT_PRIMARY", "50")])).is_err());
        assert!(EngineConfig::from_lookup(lookup_from(&[
            ("TRUST_INACTIVITY_WARNING_DAYS", "30"),
            ("TRUST_INACTIVITY_DECAY_DAYS", "30"),
        ]))
        .is_err());
    }

    #[test]
    fn test_per_slot_weights() {
        let weights = VouchWeights::default();
        assert_eq!(weights.per_slot(VouchType::Primary), 30.0);
        assert_eq!(weights.per_slot(VouchType::Secondary), 10.0);
        assert_eq!(weights.per_slot(VouchType::Community), 20.0);
    }

    #[test]
    fn test_provider_swap_and_fallback() {
        let provider = ConfigProvider::new(VouchWeights::default(), default_badge_definitions()).unwrap();
        let before = provider.current();
        assert_eq!(before.version, 1);

        let weights = VouchWeights {
            primary: 50.0,
            secondary: 25.0,
            community: 25.0,
        };
        let version = provider.replace(weights, default_badge_definitions()).unwrap();
        assert_eq!(version, 2);
        assert_eq!(provider.current().weights, weights);
        // an old snapshot is unaffected by the swap
        assert_eq!(before.weights, VouchWeights::default());

        let invalid = VouchWeights {
            primary: 90.0,
            secondary: 90.0,
            community: 90.0,
        };
        assert!(provider.replace(invalid, default_badge_definitions()).is_err());
        assert_eq!(provider.version(), 2);
        assert_eq!(provider.current().weights, weights);
    }
}
