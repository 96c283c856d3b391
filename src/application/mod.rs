// Application layer - Report pipeline and the ports it drives
pub mod browser;
pub mod dashboard_extractor;
pub mod dashboard_repository;
pub mod page_scripts;
pub mod panel_renderer;
pub mod report_service;
pub mod templater;
pub mod urls;
pub mod worker_pool;

#[cfg(test)]
pub mod testing;
