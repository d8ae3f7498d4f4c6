//! # Configuration Management
//!
//! Settings are read once from `SOURCEPLANE_*` environment variables at
//! startup (a `.env` file is loaded first by the binary).

pub mod settings;

pub use settings::{AppConfig, DatabaseConfig, MonitorConfig, ObservabilityConfig, ProviderConfig};
