//! Registry access for the modification engine.
//!
//! [`RegistryClient`] is the seam the engine talks through: manifest get/put,
//! blob get/put, and cross-repository blob copy. [`OciRegistryClient`]
//! implements it with the `oci-distribution` crate for Docker Hub, GHCR, and
//! any other distribution-spec registry.

use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use a3s_imgmod_core::config::ModConfig;
use a3s_imgmod_core::error::{ModError, Result};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use tokio::io::AsyncWriteExt;

use super::digest::sha256_digest;
use super::media_type;
use super::reference::ImageReference;
use super::types::Descriptor;

/// Media type reported for blobs pushed without one.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Readable blob content. Dropping the reader releases whatever backs it
/// (socket, spool file, or in-memory buffer).
pub type BlobReader = Box<dyn Read + Send>;

/// A manifest as fetched from a registry, before decoding.
#[derive(Debug, Clone)]
pub struct RawManifest {
    /// Content type reported for the manifest, possibly empty
    pub media_type: String,
    /// Digest reported by the registry
    pub digest: String,
    /// Exact bytes served
    pub body: Vec<u8>,
}

/// Registry operations the modification engine depends on.
///
/// Registry calls are never interrupted once started; the engine checks for
/// cancellation between calls.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch a manifest by the reference's tag or digest, or by `descriptor`
    /// within the reference's repository when given.
    async fn manifest_get(
        &self,
        reference: &ImageReference,
        descriptor: Option<&Descriptor>,
    ) -> Result<RawManifest>;

    /// Push a manifest under the reference's tag, or by digest when the
    /// reference has no tag. Returns the descriptor of the stored manifest.
    async fn manifest_put(
        &self,
        reference: &ImageReference,
        media_type: &str,
        body: &[u8],
    ) -> Result<Descriptor>;

    /// Open a blob for reading.
    async fn blob_get(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<BlobReader>;

    /// Upload a blob and return the registry-confirmed digest and size.
    async fn blob_put(&self, reference: &ImageReference, content: BlobReader)
        -> Result<Descriptor>;

    /// Make a blob from `source` available in `target` without the caller
    /// reading it.
    async fn blob_copy(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<()>;
}

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// [`RegistryClient`] backed by `oci-distribution`.
///
/// Blob reads are spooled to an anonymous temp file so the engine gets a
/// plain synchronous reader; the file is removed when the reader is dropped.
///
/// Uploads are not streamed: `oci-distribution` pushes blobs from a byte
/// slice, so [`RegistryClient::blob_put`] holds the whole blob in memory
/// while it is sent. Peak memory for a run is the size of the largest
/// rewritten layer.
pub struct OciRegistryClient {
    client: Client,
    auth: RegistryAuth,
    temp_dir: Option<PathBuf>,
}

impl OciRegistryClient {
    /// Create a client with anonymous authentication.
    pub fn new(config: &ModConfig) -> Self {
        Self::with_auth(RegistryAuth::anonymous(), config)
    }

    /// Create a client with the given authentication.
    pub fn with_auth(auth: RegistryAuth, config: &ModConfig) -> Self {
        let protocol = if config.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(config.insecure_registries.clone())
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });

        Self {
            client,
            auth,
            temp_dir: config.temp_dir.clone(),
        }
    }

    /// Convert an ImageReference to an oci-distribution Reference, preferring
    /// an explicit digest over the reference's own selector.
    fn to_oci_reference(&self, reference: &ImageReference, digest: Option<&str>) -> Result<Reference> {
        let ref_str = match (digest.or(reference.digest.as_deref()), &reference.tag) {
            (Some(digest), _) => format!("{}@{}", reference.repository_name(), digest),
            (None, Some(tag)) => format!("{}:{}", reference.repository_name(), tag),
            (None, None) => format!("{}:latest", reference.repository_name()),
        };

        ref_str.parse::<Reference>().map_err(|e| {
            ModError::OciImageError(format!("Invalid OCI reference '{}': {}", ref_str, e))
        })
    }

    async fn authenticate(
        &self,
        oci_ref: &Reference,
        reference: &ImageReference,
        operation: RegistryOperation,
    ) -> Result<()> {
        self.client
            .auth(oci_ref, &self.auth.to_oci_auth(), operation)
            .await
            .map(|_| ())
            .map_err(|e| registry_error(reference, "Failed to authenticate", e))
    }

    fn spool_file(&self) -> Result<std::fs::File> {
        let file = match &self.temp_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        };
        file.map_err(|e| ModError::ResourceError(format!("Failed to create blob spool file: {}", e)))
    }
}

#[async_trait]
impl RegistryClient for OciRegistryClient {
    async fn manifest_get(
        &self,
        reference: &ImageReference,
        descriptor: Option<&Descriptor>,
    ) -> Result<RawManifest> {
        let oci_ref = self.to_oci_reference(reference, descriptor.map(|d| d.digest.as_str()))?;

        tracing::debug!(reference = %oci_ref, "Pulling manifest");

        let (body, digest) = self
            .client
            .pull_manifest_raw(
                &oci_ref,
                &self.auth.to_oci_auth(),
                media_type::ACCEPTED_MANIFESTS,
            )
            .await
            .map_err(|e| registry_error(reference, "Failed to pull manifest", e))?;

        let media_type = descriptor
            .map(|d| d.media_type.clone())
            .filter(|mt| !mt.is_empty())
            .or_else(|| declared_media_type(&body))
            .unwrap_or_default();

        Ok(RawManifest {
            media_type,
            digest,
            body,
        })
    }

    async fn manifest_put(
        &self,
        reference: &ImageReference,
        media_type: &str,
        body: &[u8],
    ) -> Result<Descriptor> {
        // A tag wins over a digest when pushing
        let oci_ref = match &reference.tag {
            Some(tag) => self.to_oci_reference(&reference.with_tag(tag.clone()), None)?,
            None => self.to_oci_reference(reference, None)?,
        };
        self.authenticate(&oci_ref, reference, RegistryOperation::Push)
            .await?;

        let content_type = media_type
            .parse()
            .map_err(|_| ModError::OciImageError(format!("Invalid media type '{}'", media_type)))?;

        let url = self
            .client
            .push_manifest_raw(&oci_ref, body.to_vec(), content_type)
            .await
            .map_err(|e| registry_error(reference, "Failed to push manifest", e))?;

        let digest = sha256_digest(body);
        tracing::info!(reference = %oci_ref, digest = %digest, url = %url, "Pushed manifest");

        Ok(Descriptor::new(media_type, digest, body.len() as u64))
    }

    async fn blob_get(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<BlobReader> {
        let oci_ref = self.to_oci_reference(reference, Some(&descriptor.digest))?;
        self.authenticate(&oci_ref, reference, RegistryOperation::Pull)
            .await?;

        tracing::debug!(
            digest = %descriptor.digest,
            size = descriptor.size,
            "Pulling blob"
        );

        let mut file = tokio::fs::File::from_std(self.spool_file()?);
        self.client
            .pull_blob(&oci_ref, &to_oci_descriptor(descriptor), &mut file)
            .await
            .map_err(|e| {
                registry_error(reference, &format!("Failed to pull blob {}", descriptor.digest), e)
            })?;
        file.flush().await?;

        let mut file = file.into_std().await;
        file.seek(SeekFrom::Start(0))?;
        Ok(Box::new(file))
    }

    async fn blob_put(
        &self,
        reference: &ImageReference,
        mut content: BlobReader,
    ) -> Result<Descriptor> {
        // oci-distribution uploads from a slice, so the blob is buffered in
        // full; read the spool off the runtime threads
        let data = tokio::task::spawn_blocking(move || {
            let mut data = Vec::new();
            content.read_to_end(&mut data).map(|_| data)
        })
        .await
        .map_err(|e| ModError::ResourceError(format!("Blob read task failed: {}", e)))??;

        let digest = sha256_digest(&data);
        let oci_ref = self.to_oci_reference(&reference.repository_only(), None)?;
        self.authenticate(&oci_ref, reference, RegistryOperation::Push)
            .await?;

        self.client
            .push_blob(&oci_ref, &data, &digest)
            .await
            .map_err(|e| registry_error(reference, &format!("Failed to push blob {}", digest), e))?;

        tracing::debug!(digest = %digest, size = data.len(), "Pushed blob");

        Ok(Descriptor::new(OCTET_STREAM, digest, data.len() as u64))
    }

    async fn blob_copy(
        &self,
        source: &ImageReference,
        target: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<()> {
        if source.same_repository(target) {
            return Ok(());
        }

        if source.registry == target.registry {
            let source_ref = self.to_oci_reference(&source.repository_only(), Some(&descriptor.digest))?;
            let target_ref = self.to_oci_reference(&target.repository_only(), None)?;
            self.authenticate(&target_ref, target, RegistryOperation::Push)
                .await?;

            self.client
                .mount_blob(&target_ref, &source_ref, &descriptor.digest)
                .await
                .map_err(|e| {
                    registry_error(target, &format!("Failed to mount blob {}", descriptor.digest), e)
                })?;

            tracing::debug!(
                digest = %descriptor.digest,
                from = %source.repository_name(),
                to = %target.repository_name(),
                "Mounted blob"
            );
            return Ok(());
        }

        // Different registries: stream through the local spool
        let content = self.blob_get(source, descriptor).await?;
        let pushed = self.blob_put(target, content).await?;
        if pushed.digest != descriptor.digest {
            return Err(ModError::ConsistencyError(format!(
                "blob copy digest mismatch, pushed {}, expected {}",
                pushed.digest, descriptor.digest
            )));
        }
        Ok(())
    }
}

fn to_oci_descriptor(descriptor: &Descriptor) -> OciDescriptor {
    OciDescriptor {
        media_type: descriptor.media_type.clone(),
        digest: descriptor.digest.clone(),
        size: descriptor.size as i64,
        urls: descriptor.urls.clone(),
        ..Default::default()
    }
}

/// The `mediaType` a manifest body declares for itself, if any.
fn declared_media_type(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()?
        .get("mediaType")?
        .as_str()
        .map(String::from)
}

/// Map a transport failure into the error taxonomy, separating "not found"
/// from everything else.
fn registry_error(reference: &ImageReference, context: &str, err: impl std::fmt::Display) -> ModError {
    let message = err.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("not found")
        || lower.contains("manifest_unknown")
        || lower.contains("blob_unknown")
        || lower.contains("404")
    {
        ModError::NotFound(format!("{}: {}: {}", reference, context, message))
    } else {
        ModError::RegistryError {
            registry: reference.registry.clone(),
            message: format!("{}: {}", context, message),
        }
    }
}
