use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub day_check_interval_secs: u64,
    /// Silence threshold per live stream; `None` disables stall reporting.
    pub stream_liveness_secs: Option<u64>,
    pub network_probe_interval_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "bookdesk.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            day_check_interval_secs: env::var("DAY_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            stream_liveness_secs: env::var("STREAM_LIVENESS_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0),
            network_probe_interval_secs: env::var("NETWORK_PROBE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
        }
    }

    pub fn dashboard(&self) -> DashboardConfig {
        DashboardConfig {
            day_check_interval: Duration::from_secs(self.day_check_interval_secs.max(1)),
            stream_liveness: self.stream_liveness_secs.map(Duration::from_secs),
        }
    }
}

/// Tuning for the reconciliation coordinator.
#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub day_check_interval: Duration,
    pub stream_liveness: Option<Duration>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            day_check_interval: Duration::from_secs(60),
            stream_liveness: None,
        }
    }
}
