use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub publishing: PublishingConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Records buffered by the writer before a flush.
    pub flush_rate: u64,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_retention_days() -> u32 {
    3
}

fn default_prune_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max aggregates kept in the broadcast channel for /ws/scrap (slow clients may lag).
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log app stats (ws clients, ingested, rejected, persisted) at INFO level.
    pub stats_log_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Drop window state and dashboard entries for keys silent this long. Unset = keep forever.
    #[serde(default)]
    pub idle_key_ttl_secs: Option<u64>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            idle_key_ttl_secs: None,
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_points")]
    pub max_points: usize,
    #[serde(default = "default_tracked_indices")]
    pub tracked_indices: Vec<u32>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_points: default_max_points(),
            tracked_indices: default_tracked_indices(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_max_points() -> usize {
    crate::history_cache::DEFAULT_MAX_POINTS
}

fn default_tracked_indices() -> Vec<u32> {
    crate::history_cache::DEFAULT_TRACKED_INDICES.to_vec()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sim_machines")]
    pub machines: Vec<String>,
    #[serde(default = "default_sim_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_sim_max_index")]
    pub max_index: u32,
    #[serde(default = "default_sim_max_value")]
    pub max_value: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            machines: default_sim_machines(),
            interval_ms: default_sim_interval_ms(),
            max_index: default_sim_max_index(),
            max_value: default_sim_max_value(),
        }
    }
}

fn default_sim_machines() -> Vec<String> {
    vec!["A".into(), "B".into(), "C".into()]
}

fn default_sim_interval_ms() -> u64 {
    1000
}

fn default_sim_max_index() -> u32 {
    3
}

fn default_sim_max_value() -> u32 {
    5
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.flush_rate > 0,
            "database.flush_rate must be > 0, got {}",
            self.database.flush_rate
        );
        anyhow::ensure!(
            self.database.flush_interval_secs > 0,
            "database.flush_interval_secs must be > 0, got {}",
            self.database.flush_interval_secs
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.database.prune_interval_secs > 0,
            "database.prune_interval_secs must be > 0, got {}",
            self.database.prune_interval_secs
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.aggregation.window_secs > 0,
            "aggregation.window_secs must be > 0, got {}",
            self.aggregation.window_secs
        );
        if let Some(ttl) = self.aggregation.idle_key_ttl_secs {
            anyhow::ensure!(
                ttl >= self.aggregation.window_secs,
                "aggregation.idle_key_ttl_secs must be >= window_secs ({}), got {}",
                self.aggregation.window_secs,
                ttl
            );
        }
        anyhow::ensure!(
            self.history.tick_interval_ms > 0,
            "history.tick_interval_ms must be > 0, got {}",
            self.history.tick_interval_ms
        );
        anyhow::ensure!(
            self.history.max_points > 0,
            "history.max_points must be > 0, got {}",
            self.history.max_points
        );
        anyhow::ensure!(
            self.history.tracked_indices.iter().all(|&i| i >= 1),
            "history.tracked_indices must all be >= 1, got {:?}",
            self.history.tracked_indices
        );
        if self.simulator.enabled {
            anyhow::ensure!(
                !self.simulator.machines.is_empty()
                    && self.simulator.machines.iter().all(|m| !m.is_empty()),
                "simulator.machines must be a non-empty list of non-empty ids"
            );
            anyhow::ensure!(
                self.simulator.interval_ms > 0,
                "simulator.interval_ms must be > 0, got {}",
                self.simulator.interval_ms
            );
            anyhow::ensure!(
                self.simulator.max_index >= 1,
                "simulator.max_index must be >= 1, got {}",
                self.simulator.max_index
            );
            anyhow::ensure!(
                self.simulator.max_value >= 1,
                "simulator.max_value must be >= 1, got {}",
                self.simulator.max_value
            );
        }
        Ok(())
    }
}
