//! # Sourceplane
//!
//! Dynamic per-workspace data sources. A workspace points at a PostgreSQL,
//! MySQL or HTTP API backend; its connection secret is stored encrypted, opened
//! on demand, and used to build a provider whose results are normalized to a
//! canonical status vocabulary and fanned out to live subscribers.
//!
//! ## Architecture
//!
//! ```text
//! caller → DataSourceService → ResolverSession → BackendProvider → backend
//!                 ↓                  ↓                  ↓
//!           BroadcastHub      SecretCipher      StatusNormalizer
//!                 ↑
//!           StatusMonitor (poll-then-broadcast)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sourceplane::{AppConfig, BroadcastHub, DataSourceService, QueryFilter, SecretCipher};
//! use std::sync::Arc;
//!
//! # async fn example() -> sourceplane::Result<()> {
//! let config = AppConfig::from_env()?;
//! let pool = sourceplane::storage::create_pool(&config.database).await?;
//! let cipher = Arc::new(SecretCipher::new(&config.cipher)?);
//! let service = DataSourceService::with_sqlx(
//!     pool,
//!     cipher,
//!     config.providers.clone(),
//!     Arc::new(BroadcastHub::default()),
//! );
//!
//! let page = service.equipment_status("ws-1", None, &QueryFilter::for_line("L1"), Some(50)).await?;
//! println!("{} of {} items", page.items.len(), page.total);
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod providers;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export commonly used types and traits
pub use broadcast::{BroadcastHub, EventKind, HubEvent, SubscriberId, Subscription};
pub use config::AppConfig;
pub use domain::{
    CanonicalStatus, DataSourceConfig, EquipmentStatus, EquipmentStatusPage, Measurement,
    QueryFilter, SourceType, StatusMapping,
};
pub use errors::{Result, SourceplaneError};
pub use providers::{BackendProvider, ConnectionTestResult, DataProvider};
pub use services::{DataSourceResolver, DataSourceService, SecretCipher, StatusMonitor};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
        assert_eq!(APP_NAME, "sourceplane");
    }
}
