// Infrastructure layer - External dependencies and adapters
pub mod chromium;
pub mod config;
pub mod grafana_repository;
pub mod html_template;
