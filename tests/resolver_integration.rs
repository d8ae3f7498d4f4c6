//! Data source selection and secret handling against a file-backed store

mod common;

use chrono::{Duration, Utc};
use common::{fast_settings, fresh_cipher, TestStore};
use sourceplane::config::ProviderConfig;
use sourceplane::domain::SourceType;
use sourceplane::services::{
    DataSourceResolver, DecryptError, SecretCipher, SecretCipherConfig, SourceOrigin,
};
use sourceplane::storage::DataSourceConfigStore;
use sourceplane::SourceplaneError;
use std::sync::Arc;

fn resolver(store: &TestStore, cipher: SecretCipher, settings: ProviderConfig) -> DataSourceResolver {
    DataSourceResolver::new(
        Arc::new(store.configs.clone()),
        Arc::new(store.mappings.clone()),
        Arc::new(cipher),
        settings,
    )
}

#[tokio::test]
async fn oldest_active_row_is_selected() {
    let store = TestStore::new().await;
    let cipher = fresh_cipher();
    let t1 = Utc::now() - Duration::hours(2);
    let t2 = Utc::now() - Duration::hours(1);

    let first = store
        .add_source(
            "ws-1",
            SourceType::Postgres,
            Some(cipher.encrypt("postgres://app:pw@a.internal/plant").unwrap()),
            Some(t1),
        )
        .await;
    store
        .add_source(
            "ws-1",
            SourceType::MySql,
            Some(cipher.encrypt("mysql://app:pw@b.internal/plant").unwrap()),
            Some(t2),
        )
        .await;

    let resolver = resolver(&store, cipher, fast_settings());
    let source = resolver.resolve_source("ws-1", None).await.unwrap();

    assert_eq!(source.data_source_id.as_deref(), Some(first.as_str()));
    assert_eq!(source.source_type, SourceType::Postgres);
    assert_eq!(source.origin, SourceOrigin::Configured);
    assert_eq!(source.secret(), "postgres://app:pw@a.internal/plant");
}

#[tokio::test]
async fn explicit_id_must_be_active_and_in_workspace() {
    let store = TestStore::new().await;
    let cipher = fresh_cipher();
    let other = store
        .add_source("ws-2", SourceType::Postgres, Some(cipher.encrypt("postgres://x/y").unwrap()), None)
        .await;
    let inactive = store
        .add_source("ws-1", SourceType::Postgres, Some(cipher.encrypt("postgres://x/z").unwrap()), None)
        .await;
    store.configs.set_active(&inactive, false).await.unwrap();

    let resolver = resolver(&store, cipher, fast_settings());

    let err = resolver.resolve_source("ws-1", Some(&other)).await.unwrap_err();
    assert!(err.is_configuration_error());
    let err = resolver.resolve_source("ws-1", Some(&inactive)).await.unwrap_err();
    assert!(err.is_configuration_error());
    assert!(resolver.resolve_source("ws-2", Some(&other)).await.is_ok());
}

#[tokio::test]
async fn workspace_without_rows_uses_default_connection() {
    let store = TestStore::new().await;
    let settings = ProviderConfig {
        default_source_url: Some("mysql://svc:pw@shared.internal/plant".to_string()),
        ..fast_settings()
    };
    let resolver = resolver(&store, fresh_cipher(), settings);

    let source = resolver.resolve_source("ws-empty", None).await.unwrap();
    assert_eq!(source.origin, SourceOrigin::WorkspaceDefault);
    assert_eq!(source.source_type, SourceType::MySql);
    assert!(source.data_source_id.is_none());

    let bare = resolver_without_default(&store);
    assert!(bare.resolve_source("ws-empty", None).await.unwrap_err().is_configuration_error());
}

fn resolver_without_default(store: &TestStore) -> DataSourceResolver {
    resolver(store, fresh_cipher(), fast_settings())
}

#[tokio::test]
async fn undecryptable_secret_fails_without_falling_back() {
    let store = TestStore::new().await;
    let foreign = fresh_cipher();
    let id = store
        .add_source(
            "ws-1",
            SourceType::Postgres,
            Some(foreign.encrypt("postgres://app:pw@a/plant").unwrap()),
            None,
        )
        .await;

    let settings = ProviderConfig {
        default_source_url: Some("postgres://svc:pw@shared/plant".to_string()),
        ..fast_settings()
    };
    let resolver = resolver(&store, fresh_cipher(), settings);

    match resolver.resolve_source("ws-1", None).await.unwrap_err() {
        SourceplaneError::SecretDecryption { data_source_id, reason, .. } => {
            assert_eq!(data_source_id, id);
            assert_eq!(reason, DecryptError::AuthenticationFailed);
        }
        other => panic!("expected secret decryption error, got {other:?}"),
    }
}

#[tokio::test]
async fn rotated_secret_is_recovered_and_persisted() {
    let store = TestStore::new().await;
    let old_key = SecretCipher::generate_key().unwrap();
    let new_key = SecretCipher::generate_key().unwrap();
    let old = SecretCipher::new(&SecretCipherConfig::new(old_key.clone())).unwrap();

    let id = store
        .add_source(
            "ws-1",
            SourceType::Postgres,
            Some(old.encrypt("postgres://app:rotated@a/plant").unwrap()),
            None,
        )
        .await;

    let rotating =
        SecretCipher::new(&SecretCipherConfig::new(new_key.clone()).with_previous_keys(vec![old_key]))
            .unwrap();
    let resolver = resolver(&store, rotating, fast_settings());
    let source = resolver.resolve_source("ws-1", None).await.unwrap();
    assert_eq!(source.secret(), "postgres://app:rotated@a/plant");

    let row = store.configs.get_by_id(&id).await.unwrap().unwrap();
    let current_only = SecretCipher::new(&SecretCipherConfig::new(new_key)).unwrap();
    assert_eq!(
        current_only.decrypt(row.encrypted_secret.as_deref()).unwrap(),
        "postgres://app:rotated@a/plant"
    );
}

#[tokio::test]
async fn resolved_source_debug_hides_secret() {
    let store = TestStore::new().await;
    let cipher = fresh_cipher();
    store
        .add_source(
            "ws-1",
            SourceType::Postgres,
            Some(cipher.encrypt("postgres://app:hunter2@a/plant").unwrap()),
            None,
        )
        .await;

    let resolver = resolver(&store, cipher, fast_settings());
    let source = resolver.resolve_source("ws-1", None).await.unwrap();
    assert!(!format!("{source:?}").contains("hunter2"));
}

#[tokio::test]
async fn oldest_row_is_chosen_by_instant_not_text() {
    let store = TestStore::new().await;
    let cipher = fresh_cipher();
    for (id, source_type, secret, created_at) in [
        ("ds-tokyo", "postgresql", "postgres://app:pw@a/plant", "2024-01-01T09:00:00+09:00"),
        ("ds-utc", "mysql", "mysql://app:pw@b/plant", "2024-01-01T01:00:00Z"),
    ] {
        sqlx::query(
            "INSERT INTO data_source_configs (id, workspace_id, source_type, encrypted_secret, custom_queries, is_active, created_at, updated_at) VALUES ($1, 'ws-tz', $2, $3, '{}', TRUE, $4, $5)",
        )
        .bind(id)
        .bind(source_type)
        .bind(cipher.encrypt(secret).unwrap())
        .bind(created_at)
        .bind(created_at)
        .execute(&store.pool)
        .await
        .unwrap();
    }

    let resolver = resolver(&store, cipher, fast_settings());
    let source = resolver.resolve_source("ws-tz", None).await.unwrap();
    assert_eq!(source.data_source_id.as_deref(), Some("ds-tokyo"));
    assert_eq!(source.source_type, SourceType::Postgres);
}

#[tokio::test]
async fn unprefixed_foreign_ciphertext_is_a_decryption_error() {
    let store = TestStore::new().await;
    store
        .add_source(
            "ws-1",
            SourceType::Postgres,
            Some("gAAAAABlZ3Vhcm1fYmFzZTY0X2NpcGhlcnRleHQ=".to_string()),
            None,
        )
        .await;

    let resolver = resolver(&store, fresh_cipher(), fast_settings());
    let err = resolver.resolve_source("ws-1", None).await.unwrap_err();
    assert!(matches!(
        err,
        SourceplaneError::SecretDecryption { reason: DecryptError::NotEncrypted, .. }
    ));
    assert!(err.is_configuration_error());
}
