//! Building the image graph from a registry.

use std::io::Read;

use a3s_imgmod_core::error::{ModError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;

use super::{DagLayer, DagManifest, DagOciConfig, ModStatus};
use crate::oci::digest::validate_digest;
use crate::oci::{media_type, sha256_digest};
use crate::oci::{Descriptor, ImageConfig, ImageReference, Manifest, RegistryClient};

/// Fetch the manifest at `reference` (or `descriptor` within its
/// repository) and everything beneath it.
///
/// Any failure abandons the whole graph and is reported as an
/// [`ModError::AcquisitionError`] naming the reference being fetched.
pub fn dag_get<'a>(
    client: &'a dyn RegistryClient,
    reference: &'a ImageReference,
    descriptor: Option<&'a Descriptor>,
) -> BoxFuture<'a, Result<DagManifest>> {
    async move {
        fetch_node(client, reference, descriptor)
            .await
            .map_err(|e| match e {
                ModError::AcquisitionError { .. } => e,
                e => {
                    let at = match descriptor {
                        Some(desc) => reference.with_digest(desc.digest.clone()).to_string(),
                        None => reference.to_string(),
                    };
                    ModError::acquisition(at, e)
                }
            })
    }
    .boxed()
}

async fn fetch_node(
    client: &dyn RegistryClient,
    reference: &ImageReference,
    descriptor: Option<&Descriptor>,
) -> Result<DagManifest> {
    let raw = client.manifest_get(reference, descriptor).await?;
    let digest = sha256_digest(&raw.body);

    let expected = descriptor
        .map(|d| d.digest.as_str())
        .or(reference.digest.as_deref());
    if let Some(expected) = expected {
        if expected != digest {
            return Err(ModError::ConsistencyError(format!(
                "manifest body hashes to {}, expected {}",
                digest, expected
            )));
        }
    }

    let hint = descriptor
        .map(|d| d.media_type.as_str())
        .filter(|mt| !mt.is_empty())
        .unwrap_or(&raw.media_type);
    let manifest = Manifest::from_slice(hint, &raw.body)?;

    let descriptor = match descriptor {
        Some(desc) => desc.clone(),
        None => {
            let media_type = if raw.media_type.is_empty() {
                manifest.media_type().to_string()
            } else {
                media_type::base(&raw.media_type).to_string()
            };
            Descriptor::new(media_type, digest, raw.body.len() as u64)
        }
    };

    tracing::debug!(
        reference = %reference,
        digest = %descriptor.digest,
        media_type = %descriptor.media_type,
        "Fetched manifest"
    );

    let mut node = DagManifest {
        descriptor,
        raw: raw.body,
        manifest,
        status: ModStatus::Unchanged,
        children: Vec::new(),
        config: None,
        layers: Vec::new(),
        top: false,
        source: None,
    };

    match node.manifest.clone() {
        Manifest::Index(index) => {
            for entry in &index.manifests {
                let child = dag_get(client, reference, Some(entry)).await?;
                node.children.push(child);
            }
        }
        Manifest::Image(image) => {
            for desc in std::iter::once(&image.config).chain(&image.layers) {
                validate_digest(&desc.digest)?;
            }
            if media_type::is_known_config(&image.config.media_type) {
                node.config = Some(fetch_config(client, reference, &image.config).await?);
            } else {
                tracing::debug!(
                    media_type = %image.config.media_type,
                    "Config media type not decoded"
                );
            }
            node.layers = image.layers.iter().cloned().map(DagLayer::new).collect();
        }
    }

    Ok(node)
}

async fn fetch_config(
    client: &dyn RegistryClient,
    reference: &ImageReference,
    descriptor: &Descriptor,
) -> Result<DagOciConfig> {
    let reader = client.blob_get(reference, descriptor).await?;
    let mut raw = Vec::new();
    reader
        .take(descriptor.size.saturating_add(1))
        .read_to_end(&mut raw)?;

    if raw.len() as u64 != descriptor.size {
        return Err(ModError::ConsistencyError(format!(
            "config blob {} is {} bytes, descriptor says {}",
            descriptor.digest,
            raw.len(),
            descriptor.size
        )));
    }

    let digest = sha256_digest(&raw);
    if digest != descriptor.digest {
        return Err(ModError::ConsistencyError(format!(
            "config blob hashes to {}, expected {}",
            digest, descriptor.digest
        )));
    }

    let config = ImageConfig::from_slice(&raw)?;
    Ok(DagOciConfig {
        descriptor: descriptor.clone(),
        raw,
        config,
        status: ModStatus::Unchanged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::fixtures;
    use crate::oci::MemoryRegistry;

    #[tokio::test]
    async fn test_dag_get_single_image() {
        let registry = MemoryRegistry::new();
        let reference = ImageReference::parse("registry.local/app:v1").unwrap();
        let image = fixtures::push_image(
            &registry,
            &reference,
            &[fixtures::tar_layer(&[("a", b"1")]), fixtures::tar_layer(&[("b", b"2")])],
            true,
        );

        let dag = dag_get(&registry, &reference, None).await.unwrap();
        assert!(!dag.is_index());
        assert_eq!(dag.descriptor.digest, image.manifest.digest);
        assert_eq!(dag.descriptor.size, image.manifest.size);
        assert_eq!(dag.layers.len(), 2);
        assert!(dag.layers.iter().all(|l| l.status == ModStatus::Unchanged));
        let config = dag.config.as_ref().unwrap();
        assert_eq!(config.config.rootfs.diff_ids.len(), 2);
        assert_eq!(config.descriptor.digest, image.config.digest);
    }

    #[tokio::test]
    async fn test_dag_get_index() {
        let registry = MemoryRegistry::new();
        let reference = ImageReference::parse("registry.local/app:multi").unwrap();
        let index = fixtures::push_index(
            &registry,
            &reference,
            &[("amd64", vec![fixtures::tar_layer(&[("a", b"1")])]), ("arm64", vec![])],
        );

        let dag = dag_get(&registry, &reference, None).await.unwrap();
        assert!(dag.is_index());
        assert_eq!(dag.descriptor.digest, index.digest);
        assert_eq!(dag.children.len(), 2);
        assert_eq!(dag.children[0].layers.len(), 1);
        assert!(dag.children[1].layers.is_empty());
        assert!(dag.children.iter().all(|c| c.config.is_some()));
    }

    #[tokio::test]
    async fn test_dag_get_missing_reference() {
        let registry = MemoryRegistry::new();
        let reference = ImageReference::parse("registry.local/app:missing").unwrap();

        let err = dag_get(&registry, &reference, None).await.err().unwrap();
        assert!(matches!(err, ModError::AcquisitionError { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_dag_get_missing_child_abandons_graph() {
        let registry = MemoryRegistry::new();
        let reference = ImageReference::parse("registry.local/app:broken").unwrap();
        let missing = Descriptor::new(media_type::OCI1_MANIFEST, sha256_digest(b"gone"), 4);
        let body = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI1_INDEX,
            "manifests": [missing],
        }))
        .unwrap();
        registry.insert_manifest(&reference, media_type::OCI1_INDEX, &body);

        let err = dag_get(&registry, &reference, None).await.err().unwrap();
        match err {
            ModError::AcquisitionError { reference, source } => {
                assert!(reference.contains(&missing.digest));
                assert!(source.is_not_found());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dag_get_by_digest() {
        let registry = MemoryRegistry::new();
        let tagged = ImageReference::parse("registry.local/app:v1").unwrap();
        let image = fixtures::push_image(&registry, &tagged, &[], false);
        let pinned = tagged.with_digest(image.manifest.digest.clone());

        let dag = dag_get(&registry, &pinned, None).await.unwrap();
        assert_eq!(dag.descriptor.digest, image.manifest.digest);
        assert!(dag.layers.is_empty());
    }

    #[tokio::test]
    async fn test_dag_get_skips_unknown_config_type() {
        let registry = MemoryRegistry::new();
        let reference = ImageReference::parse("registry.local/chart:v1").unwrap();
        let config = Descriptor::new(
            "application/vnd.cncf.helm.config.v1+json",
            sha256_digest(b"{}"),
            2,
        );
        let body = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI1_MANIFEST,
            "config": config,
            "layers": [],
        }))
        .unwrap();
        registry.insert_manifest(&reference, media_type::OCI1_MANIFEST, &body);

        let dag = dag_get(&registry, &reference, None).await.unwrap();
        assert!(dag.config.is_none());
        assert_eq!(registry.stats().blob_gets, 0);
    }

    #[tokio::test]
    async fn test_dag_get_rejects_malformed_layer_digest() {
        let registry = MemoryRegistry::new();
        let reference = ImageReference::parse("registry.local/app:bad").unwrap();
        let image = fixtures::push_image(&registry, &reference, &[], true);
        let body = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI1_MANIFEST,
            "config": image.config,
            "layers": [Descriptor::new(media_type::OCI1_LAYER_GZIP, "sha256:nothex", 1)],
        }))
        .unwrap();
        registry.insert_manifest(&reference, media_type::OCI1_MANIFEST, &body);

        let err = dag_get(&registry, &reference, None).await.err().unwrap();
        match err {
            ModError::AcquisitionError { source, .. } => {
                assert!(matches!(*source, ModError::OciImageError(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_dag_get_config_size_disagrees() {
        let registry = MemoryRegistry::new();
        let reference = ImageReference::parse("registry.local/app:huge").unwrap();
        let image = fixtures::push_image(&registry, &reference, &[], true);

        let mut config = image.config.clone();
        config.size = u64::MAX / 2;
        let body = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI1_MANIFEST,
            "config": config,
            "layers": [],
        }))
        .unwrap();
        registry.insert_manifest(&reference, media_type::OCI1_MANIFEST, &body);

        let err = dag_get(&registry, &reference, None).await.err().unwrap();
        match err {
            ModError::AcquisitionError { source, .. } => {
                assert!(matches!(*source, ModError::ConsistencyError(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
