//! Status normalization
//!
//! Backends report equipment status in their own vocabulary. The normalizer
//! maps a raw value onto [`CanonicalStatus`] by checking, in order:
//!
//! 1. workspace overrides for the backend type in use
//! 2. the global default table
//! 3. `UNKNOWN`
//!
//! Matching trims surrounding whitespace and compares Unicode-lowercased text.
//! Lookups are total: every input string yields a value.

use crate::domain::{CanonicalStatus, SourceType, StatusMapping};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::warn;

static GLOBAL_STATUS_TABLE: Lazy<HashMap<&'static str, CanonicalStatus>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for raw in ["running", "active", "online", "started"] {
        table.insert(raw, CanonicalStatus::Active);
    }
    for raw in ["stopped", "offline", "down", "shutdown"] {
        table.insert(raw, CanonicalStatus::Stop);
    }
    for raw in ["idle", "pause", "standby", "waiting", "hold"] {
        table.insert(raw, CanonicalStatus::Pause);
    }
    table
});

fn match_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Global default mapping, used when no workspace override matches
pub fn normalize_global(raw_status: &str) -> CanonicalStatus {
    GLOBAL_STATUS_TABLE.get(match_key(raw_status).as_str()).copied().unwrap_or_default()
}

/// Normalizer bound to one (workspace, backend type) pair
#[derive(Debug, Clone, Default)]
pub struct StatusNormalizer {
    overrides: HashMap<String, CanonicalStatus>,
}

impl StatusNormalizer {
    /// Normalizer with only the global table
    pub fn global() -> Self {
        Self::default()
    }

    /// Build from the workspace's mapping rows for `backend_type`.
    ///
    /// Rows for other backend types, and rows targeting `UNKNOWN`, are skipped.
    pub fn from_mappings(backend_type: SourceType, mappings: &[StatusMapping]) -> Self {
        let mut overrides = HashMap::new();
        for mapping in mappings.iter().filter(|m| m.backend_type == backend_type) {
            if !mapping.target_status.is_mapping_target() {
                warn!(
                    workspace_id = %mapping.workspace_id,
                    source_status = %mapping.source_status,
                    "Ignoring status mapping with invalid target"
                );
                continue;
            }
            overrides.insert(match_key(&mapping.source_status), mapping.target_status);
        }
        Self { overrides }
    }

    /// Number of workspace overrides in effect
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }

    pub fn normalize(&self, raw_status: &str) -> CanonicalStatus {
        let key = match_key(raw_status);
        if let Some(status) = self.overrides.get(&key) {
            return *status;
        }
        GLOBAL_STATUS_TABLE.get(key.as_str()).copied().unwrap_or_default()
    }
}
