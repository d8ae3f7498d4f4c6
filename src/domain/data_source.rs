//! Data source configuration domain types
//!
//! A workspace points at exactly one backing store at a time. The store kind is
//! a closed set decided once when a provider is resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::status::CanonicalStatus;

/// Kind of backing store a workspace points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Relational dialect A
    Postgres,
    /// Relational dialect B
    MySql,
    /// Remote HTTP API
    HttpApi,
}

impl SourceType {
    /// Get the database representation of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
            Self::HttpApi => "http_api",
        }
    }

    /// Whether this source is served by the SQL provider
    pub fn is_relational(&self) -> bool {
        matches!(self, Self::Postgres | Self::MySql)
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "relational_a" => Ok(Self::Postgres),
            "mysql" | "mariadb" | "relational_b" => Ok(Self::MySql),
            "http_api" | "http" | "api" => Ok(Self::HttpApi),
            _ => Err(format!("Unknown data source type: {}", s)),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One workspace data source configuration row.
///
/// `workspace_id` is an opaque string. Some rows carry literal placeholders
/// instead of UUIDs and must round-trip untouched.
#[derive(Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub id: String,
    pub workspace_id: String,
    pub source_type: SourceType,
    /// Ciphertext envelope, or a legacy plaintext value
    #[serde(skip_serializing)]
    pub encrypted_secret: Option<String>,
    pub custom_queries: HashMap<String, String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl DataSourceConfig {
    /// Named custom query template, if one is configured and non-blank
    pub fn custom_query(&self, name: &str) -> Option<&str> {
        self.custom_queries.get(name).map(String::as_str).filter(|q| !q.trim().is_empty())
    }
}

impl fmt::Debug for DataSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceConfig")
            .field("id", &self.id)
            .field("workspace_id", &self.workspace_id)
            .field("source_type", &self.source_type)
            .field("encrypted_secret", &self.encrypted_secret.as_ref().map(|_| "[REDACTED]"))
            .field("custom_queries", &self.custom_queries.keys().collect::<Vec<_>>())
            .field("is_active", &self.is_active)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Per-workspace override mapping a raw backend status onto a canonical one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMapping {
    pub workspace_id: String,
    pub source_status: String,
    pub target_status: CanonicalStatus,
    pub backend_type: SourceType,
}
