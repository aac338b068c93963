//! In-process registry.
//!
//! Keeps blobs, manifests, and tags per repository in memory and counts the
//! operations performed against it. Used by the engine's tests and by
//! callers that want to rehearse a modification without network access.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use a3s_imgmod_core::error::{ModError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::digest::sha256_digest;
use super::reference::ImageReference;
use super::registry::{BlobReader, RawManifest, RegistryClient, OCTET_STREAM};
use super::types::Descriptor;

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub blob_gets: usize,
    pub blob_puts: usize,
    pub blob_copies: usize,
    pub manifest_gets: usize,
    pub manifest_puts: usize,
}

#[derive(Default)]
struct Repository {
    blobs: HashMap<String, Vec<u8>>,
    manifests: HashMap<String, (String, Vec<u8>)>,
    tags: HashMap<String, String>,
}

#[derive(Default)]
struct State {
    repositories: HashMap<String, Repository>,
    stats: RegistryStats,
}

/// Thread-safe in-memory [`RegistryClient`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob in the reference's repository and return its digest.
    pub fn insert_blob(&self, reference: &ImageReference, data: &[u8]) -> String {
        let digest = sha256_digest(data);
        let mut state = self.state.lock();
        state
            .repositories
            .entry(reference.repository_name())
            .or_default()
            .blobs
            .insert(digest.clone(), data.to_vec());
        digest
    }

    /// Store a manifest, tagging it when the reference carries a tag.
    pub fn insert_manifest(
        &self,
        reference: &ImageReference,
        media_type: &str,
        body: &[u8],
    ) -> Descriptor {
        let digest = sha256_digest(body);
        let mut state = self.state.lock();
        let repo = state
            .repositories
            .entry(reference.repository_name())
            .or_default();
        repo.manifests
            .insert(digest.clone(), (media_type.to_string(), body.to_vec()));
        if let Some(tag) = &reference.tag {
            repo.tags.insert(tag.clone(), digest.clone());
        }
        Descriptor::new(media_type, digest, body.len() as u64)
    }

    pub fn blob(&self, reference: &ImageReference, digest: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .repositories
            .get(&reference.repository_name())?
            .blobs
            .get(digest)
            .cloned()
    }

    pub fn has_blob(&self, reference: &ImageReference, digest: &str) -> bool {
        self.blob(reference, digest).is_some()
    }

    /// Manifest by the reference's digest, or its tag when no digest is set.
    pub fn manifest(&self, reference: &ImageReference) -> Option<(String, Vec<u8>)> {
        let state = self.state.lock();
        let repo = state.repositories.get(&reference.repository_name())?;
        let digest = match (&reference.digest, &reference.tag) {
            (Some(digest), _) => digest.clone(),
            (None, Some(tag)) => repo.tags.get(tag)?.clone(),
            (None, None) => return None,
        };
        repo.manifests.get(&digest).cloned()
    }

    pub fn tag_digest(&self, reference: &ImageReference, tag: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .repositories
            .get(&reference.repository_name())?
            .tags
            .get(tag)
            .cloned()
    }

    pub fn stats(&self) -> RegistryStats {
        self.state.lock().stats
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = RegistryStats::default();
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn manifest_get(
        &self,
        reference: &ImageReference,
        descriptor: Option<&Descriptor>,
    ) -> Result<RawManifest> {
        let lookup = match descriptor {
            Some(descriptor) => reference.with_digest(descriptor.digest.clone()),
            None => reference.clone(),
        };
        self.state.lock().stats.manifest_gets += 1;

        let (media_type, body) = self
            .manifest(&lookup)
            .ok_or_else(|| ModError::NotFound(format!("manifest {}", lookup)))?;

        Ok(RawManifest {
            media_type,
            digest: sha256_digest(&body),
            body,
        })
    }

    async fn manifest_put(
        &self,
        reference: &ImageReference,
        media_type: &str,
        body: &[u8],
    ) -> Result<Descriptor> {
        let digest = sha256_digest(body);
        if reference.tag.is_none() {
            if let Some(expected) = &reference.digest {
                if *expected != digest {
                    return Err(ModError::ConsistencyError(format!(
                        "manifest pushed as {} hashes to {}",
                        expected, digest
                    )));
                }
            }
        }

        self.state.lock().stats.manifest_puts += 1;
        Ok(self.insert_manifest(reference, media_type, body))
    }

    async fn blob_get(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<BlobReader> {
        self.state.lock().stats.blob_gets += 1;
        let data = self.blob(reference, &descriptor.digest).ok_or_else(|| {
            ModError::NotFound(format!(
                "blob {} in {}",
                descriptor.digest,
                reference.repository_name()
            ))
        })?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn blob_put(
        &self,
        reference: &ImageReference,
        mut content: BlobReader,
    ) -> Result<Descriptor> {
        let mut data = Vec::new();
        content.read_to_end(&mut data)?;

        self.state.lock().stats.blob_puts += 1;
        let digest = self.insert_blob(reference, &data);
        Ok(Descriptor::new(OCTET_STREAM, digest, data.len() as u64))
    }

    async fn blob_copy(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<()> {
        let data = self.blob(source, &descriptor.digest).ok_or_else(|| {
            ModError::NotFound(format!(
                "blob {} in {}",
                descriptor.digest,
                source.repository_name()
            ))
        })?;

        self.state.lock().stats.blob_copies += 1;
        self.insert_blob(target, &data);
        Ok(())
    }
}
