//! OpenDAL Operator factory for the vault's S3-compatible backend.

use anyhow::{Context, Result};
use coffre_core::config::StorageConfig;
use opendal::Operator;

/// Build an OpenDAL operator for the configured S3-compatible endpoint.
///
/// Path-style addressing (the opendal default) is required by MinIO and
/// SeaweedFS. If `enforce_tls` is set and the endpoint is plain HTTP the
/// build fails; otherwise HTTP only logs a warning for local development.
pub fn build_operator(
    storage: &StorageConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "storage endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "storage endpoint uses plaintext HTTP — credentials are transmitted unencrypted"
        );
    }

    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .access_key_id(access_key_id)
        .secret_access_key(secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}
