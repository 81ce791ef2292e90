use crate::config::AppConfig;
use crate::dashboard::Dashboard;
use crate::db::SqliteStore;
use crate::services::network::NetworkMonitor;

pub struct AppState {
    pub config: AppConfig,
    pub store: SqliteStore,
    pub dashboard: Dashboard,
    pub network: NetworkMonitor,
}
