// Repository trait for dashboard definitions
use crate::domain::dashboard::Dashboard;
use crate::domain::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait DashboardRepository: Send + Sync {
    /// Fetch the saved dashboard model. Row panels are kept; panels nested in
    /// collapsed rows are flattened into the list.
    async fn fetch_dashboard(&self, uid: &str) -> Result<Dashboard>;

    /// Version string of the dashboard server, used to pick page selectors
    async fn fetch_version(&self) -> Result<String>;
}
