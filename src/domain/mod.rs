// Domain layer - Core business entities
pub mod dashboard;
pub mod error;
pub mod panel_selection;
pub mod time_range;
