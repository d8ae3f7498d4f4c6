//! Repository modules for data access
//!
//! Each repository handles one configuration table and implements the
//! matching store trait.

pub mod data_source;
pub mod status_mapping;

pub use data_source::{CreateDataSourceRequest, DataSourceConfigRepository};
pub use status_mapping::{StatusMappingRepository, UpsertStatusMappingRequest};
