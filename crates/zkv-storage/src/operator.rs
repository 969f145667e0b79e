//! OpenDAL Operator factory for zkvault storage backends

use anyhow::Context;
use opendal::Operator;
use zkv_core::config::{expand_tilde, StorageBackend, StorageConfig};
use zkv_core::ZkvResult;

/// Build the operator selected by `[storage]`.
///
/// `fs` roots the tree at `storage.root` (tilde-expanded); OpenDAL creates
/// missing parent directories on first write.
pub fn build_operator(cfg: &StorageConfig) -> ZkvResult<Operator> {
    let op = match cfg.backend {
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
        StorageBackend::Fs => {
            let root = expand_tilde(&cfg.root);
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder)
                .with_context(|| format!("creating OpenDAL fs operator at {}", root.display()))?
                .finish()
        }
    };

    tracing::debug!(backend = ?cfg.backend, "storage operator ready");
    Ok(op.layer(opendal::layers::LoggingLayer::default()))
}
