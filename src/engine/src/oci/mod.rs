//! OCI image model and registry access.
//!
//! Everything the modification engine needs to talk about images without
//! knowing how they are modified:
//!
//! - Manifest, index, descriptor, and config documents ([`types`])
//! - Media type constants and predicates ([`media_type`])
//! - Content digests and digesting writers ([`digest`])
//! - Image references ([`reference`])
//! - The registry seam and its implementations ([`registry`], [`memory`])
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   RegistryClient                          │
//! │                                                           │
//! │  manifest_get / manifest_put    blob_get / blob_put       │
//! │                   blob_copy                               │
//! │         ▲                              ▲                  │
//! │         │                              │                  │
//! │  OciRegistryClient             MemoryRegistry             │
//! │  (oci-distribution)            (in-process)               │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod digest;
pub mod media_type;
pub mod memory;
pub mod reference;
pub mod registry;
pub mod types;

pub use digest::{sha256_digest, DigestWriter};
pub use memory::{MemoryRegistry, RegistryStats};
pub use reference::ImageReference;
pub use registry::{BlobReader, OciRegistryClient, RawManifest, RegistryAuth, RegistryClient};
pub use types::{
    ContainerConfig, Descriptor, History, ImageConfig, ImageIndex, ImageManifest, Manifest,
    Platform, RootFs,
};
