//! A3S Image Modification - in-place container image rewriting.
//!
//! Fetches an image (single manifest or manifest list) as an owned graph,
//! runs caller-supplied steps over manifests, configs, and layer contents,
//! and pushes only what changed. Untouched manifests and blobs keep their
//! digests.
//!
//! ```no_run
//! use a3s_imgmod::{apply, with_layer_entry_step, ImageReference, ModStatus, OciRegistryClient};
//! use a3s_imgmod_core::ModConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> a3s_imgmod_core::Result<()> {
//! let client = OciRegistryClient::new(&ModConfig::default());
//! let source = ImageReference::parse("ghcr.io/example/app:1.0")?;
//! let strip_docs = with_layer_entry_step(|_, _, entry| {
//!     let status = if entry.path.starts_with("usr/share/doc") {
//!         ModStatus::Deleted
//!     } else {
//!         ModStatus::Unchanged
//!     };
//!     Ok((entry, status))
//! });
//! let result = apply(&CancellationToken::new(), &client, &source, vec![strip_docs]).await?;
//! println!("pushed {}", result);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::result_large_err)]

pub mod dag;
pub mod modify;
pub mod oci;

pub use dag::{DagLayer, DagManifest, DagOciConfig, ModStatus};
pub use modify::{
    apply, with_config_step, with_data, with_engine_config, with_layer_entry_step,
    with_layer_step, with_layer_walk, with_manifest_step, with_target, ModOption, RunConfig,
    StepContext, TarEntry,
};
pub use oci::{
    Descriptor, ImageReference, MemoryRegistry, OciRegistryClient, RegistryAuth, RegistryClient,
};

/// A3S Image Modification version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
