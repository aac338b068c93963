//! Test images, built in memory or pushed to a [`MemoryRegistry`].

use std::io::{BufRead, BufReader, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;

use super::{DagLayer, DagManifest, DagOciConfig, ModStatus};
use crate::oci::{media_type, sha256_digest};
use crate::oci::{
    Descriptor, ImageConfig, ImageManifest, ImageReference, Manifest, MemoryRegistry, Platform,
};

/// Plain tar with one regular file per entry.
pub fn tar_layer(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, *path, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Paths and contents of a plain or gzip layer blob.
pub fn layer_files(blob: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut reader = BufReader::new(blob);
    let gzipped = reader.fill_buf().unwrap().starts_with(&[0x1f, 0x8b]);
    let reader: Box<dyn Read + '_> = if gzipped {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };

    let mut archive = tar::Archive::new(reader);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (path, data)
        })
        .collect()
}

pub fn layer_paths(blob: &[u8]) -> Vec<String> {
    layer_files(blob).into_iter().map(|(path, _)| path).collect()
}

fn platform(arch: &str) -> Platform {
    Platform {
        architecture: arch.to_string(),
        os: "linux".to_string(),
        os_version: None,
        os_features: None,
        variant: None,
        features: None,
    }
}

fn config_json(arch: &str, diff_ids: &[String]) -> Vec<u8> {
    let history: Vec<_> = (0..diff_ids.len())
        .map(|i| json!({"created_by": format!("ADD layer{} /", i)}))
        .collect();
    serde_json::to_vec(&json!({
        "architecture": arch,
        "os": "linux",
        "config": {"Env": ["PATH=/usr/local/bin:/usr/bin"], "Cmd": ["/bin/sh"]},
        "rootfs": {"type": "layers", "diff_ids": diff_ids},
        "history": history,
    }))
    .unwrap()
}

/// What [`push_image`] stored.
#[derive(Debug, Clone)]
pub struct TestImage {
    pub manifest: Descriptor,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    pub diff_ids: Vec<String>,
}

pub fn push_image(
    registry: &MemoryRegistry,
    reference: &ImageReference,
    layers: &[Vec<u8>],
    gzipped: bool,
) -> TestImage {
    push_platform_image(registry, reference, "amd64", layers, gzipped)
}

/// Push layers, config, and manifest. The manifest is tagged when the
/// reference carries a tag.
pub fn push_platform_image(
    registry: &MemoryRegistry,
    reference: &ImageReference,
    arch: &str,
    layers: &[Vec<u8>],
    gzipped: bool,
) -> TestImage {
    let repo = reference.repository_only();
    let mut descriptors = Vec::new();
    let mut diff_ids = Vec::new();
    for tar in layers {
        diff_ids.push(sha256_digest(tar));
        let (blob, mt) = if gzipped {
            (gzip(tar), media_type::OCI1_LAYER_GZIP)
        } else {
            (tar.clone(), media_type::OCI1_LAYER)
        };
        let digest = registry.insert_blob(&repo, &blob);
        descriptors.push(Descriptor::new(mt, digest, blob.len() as u64));
    }

    let config_body = config_json(arch, &diff_ids);
    let config = Descriptor::new(
        media_type::OCI1_IMAGE_CONFIG,
        registry.insert_blob(&repo, &config_body),
        config_body.len() as u64,
    );

    let body = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": media_type::OCI1_MANIFEST,
        "config": config,
        "layers": descriptors,
    }))
    .unwrap();
    let manifest = registry.insert_manifest(reference, media_type::OCI1_MANIFEST, &body);

    TestImage {
        manifest,
        config,
        layers: descriptors,
        diff_ids,
    }
}

/// Push one image per platform and an index over them.
pub fn push_index(
    registry: &MemoryRegistry,
    reference: &ImageReference,
    platforms: &[(&str, Vec<Vec<u8>>)],
) -> Descriptor {
    let repo = reference.repository_only();
    let entries: Vec<Descriptor> = platforms
        .iter()
        .map(|(arch, layers)| {
            let image = push_platform_image(registry, &repo, arch, layers, true);
            let mut entry = image.manifest;
            entry.platform = Some(platform(arch));
            entry
        })
        .collect();

    let body = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": media_type::OCI1_INDEX,
        "manifests": entries,
    }))
    .unwrap();
    registry.insert_manifest(reference, media_type::OCI1_INDEX, &body)
}

/// Manifest and config stored at a reference.
pub fn fetch_image(
    registry: &MemoryRegistry,
    reference: &ImageReference,
) -> (ImageManifest, ImageConfig) {
    let (mt, body) = registry.manifest(reference).unwrap();
    let Manifest::Image(image) = Manifest::from_slice(&mt, &body).unwrap() else {
        panic!("expected image manifest at {}", reference);
    };
    let config = registry.blob(reference, &image.config.digest).unwrap();
    (image, ImageConfig::from_slice(&config).unwrap())
}

/// Image manifest node with synthetic layer digests, no registry involved.
pub fn image_node(arch: &str, layer_count: usize) -> DagManifest {
    let layers: Vec<Descriptor> = (0..layer_count)
        .map(|i| {
            let blob = format!("{}-layer-{}", arch, i);
            Descriptor::new(
                media_type::OCI1_LAYER_GZIP,
                sha256_digest(blob.as_bytes()),
                blob.len() as u64,
            )
        })
        .collect();
    let diff_ids: Vec<String> = (0..layer_count)
        .map(|i| sha256_digest(format!("{}-diff-{}", arch, i).as_bytes()))
        .collect();

    let config_raw = config_json(arch, &diff_ids);
    let config_desc = Descriptor::new(
        media_type::OCI1_IMAGE_CONFIG,
        sha256_digest(&config_raw),
        config_raw.len() as u64,
    );
    let config = DagOciConfig {
        descriptor: config_desc.clone(),
        config: ImageConfig::from_slice(&config_raw).unwrap(),
        raw: config_raw,
        status: ModStatus::Unchanged,
    };

    let raw = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": media_type::OCI1_MANIFEST,
        "config": config_desc,
        "layers": layers,
    }))
    .unwrap();

    let mut descriptor =
        Descriptor::new(media_type::OCI1_MANIFEST, sha256_digest(&raw), raw.len() as u64);
    descriptor.platform = Some(platform(arch));

    DagManifest {
        descriptor,
        manifest: Manifest::from_slice(media_type::OCI1_MANIFEST, &raw).unwrap(),
        raw,
        status: ModStatus::Unchanged,
        children: Vec::new(),
        config: Some(config),
        layers: layers.into_iter().map(DagLayer::new).collect(),
        top: false,
        source: None,
    }
}

pub fn index_node(children: Vec<DagManifest>) -> DagManifest {
    let entries: Vec<Descriptor> = children.iter().map(|c| c.descriptor.clone()).collect();
    let raw = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": media_type::OCI1_INDEX,
        "manifests": entries,
    }))
    .unwrap();

    DagManifest {
        descriptor: Descriptor::new(media_type::OCI1_INDEX, sha256_digest(&raw), raw.len() as u64),
        manifest: Manifest::from_slice(media_type::OCI1_INDEX, &raw).unwrap(),
        raw,
        status: ModStatus::Unchanged,
        children,
        config: None,
        layers: Vec::new(),
        top: true,
        source: None,
    }
}
