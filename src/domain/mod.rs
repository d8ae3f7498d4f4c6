//! # Domain Types
//!
//! Data source configuration, canonical status vocabulary and the read models
//! returned by backend providers.

pub mod data_source;
pub mod records;
pub mod status;

pub use data_source::{DataSourceConfig, SourceType, StatusMapping};
pub use records::{EquipmentStatus, EquipmentStatusPage, Measurement, QueryFilter, Row};
pub use status::CanonicalStatus;
