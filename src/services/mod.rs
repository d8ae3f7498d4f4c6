//! Business logic services
//!
//! Secret handling, status normalization, provider resolution and the
//! caller-facing data source operations.

pub mod data_source_service;
pub mod monitor;
pub mod resolver;
pub mod secret_cipher;
pub mod status_normalizer;

pub use data_source_service::{DataSourceService, ReencryptionReport};
pub use monitor::{CycleReport, StatusMonitor};
pub use resolver::{DataSourceResolver, ProviderHandle, ResolvedSource, ResolverSession, SourceOrigin};
pub use secret_cipher::{DecryptError, RecoveredSecret, SecretCipher, SecretCipherConfig};
pub use status_normalizer::{normalize_global, StatusNormalizer};
