//! Writing a modified graph to the target repository.
//!
//! Commit runs bottom-up so every blob and child manifest exists in the
//! target before anything that references it. A manifest whose decoded
//! content is unchanged is pushed with its original bytes, so untouched
//! images keep their digests.

use std::io::Cursor;

use a3s_imgmod_core::error::{ModError, Result};
use base64::Engine;
use futures::future::BoxFuture;
use futures::FutureExt;

use super::{DagLayer, DagManifest, ModStatus};
use crate::oci::{media_type, sha256_digest};
use crate::oci::{Descriptor, History, ImageConfig, ImageReference, Manifest, RegistryClient};

/// `created_by` recorded for layers added by a modification.
const ADDED_LAYER_CREATED_BY: &str = "a3s-imgmod";

/// Push `node` and everything beneath it to `target`, returning the
/// descriptor the node is now reachable by.
///
/// `source` is where unchanged blobs are copied from when it names a
/// different repository than `target`; a node's own override source takes
/// precedence. `max_data_size` is the inline data limit, `-1` to leave
/// data fields alone.
pub fn dag_put<'a>(
    client: &'a dyn RegistryClient,
    source: &'a ImageReference,
    target: &'a ImageReference,
    max_data_size: i64,
    node: &'a mut DagManifest,
) -> BoxFuture<'a, Result<Descriptor>> {
    async move {
        let source = node.source.clone().unwrap_or_else(|| source.clone());
        let descriptor = if node.is_index() {
            commit_index(client, &source, target, max_data_size, node).await?
        } else {
            commit_image(client, &source, target, max_data_size, node).await?
        };
        node.descriptor = descriptor.clone();
        Ok(descriptor)
    }
    .boxed()
}

async fn commit_index(
    client: &dyn RegistryClient,
    source: &ImageReference,
    target: &ImageReference,
    max_data_size: i64,
    node: &mut DagManifest,
) -> Result<Descriptor> {
    let mut committed = Vec::with_capacity(node.children.len());
    for child in node.children.iter_mut() {
        let original = child.descriptor.digest.clone();
        let descriptor = dag_put(client, source, target, max_data_size, child).await?;
        committed.push((original, descriptor));
    }

    let Manifest::Index(index) = &mut node.manifest else {
        return Err(ModError::Other("index node holds an image manifest".to_string()));
    };
    for entry in index.manifests.iter_mut() {
        let Some((_, new)) = committed.iter().find(|(original, _)| *original == entry.digest) else {
            continue;
        };
        if new.digest != entry.digest {
            tracing::debug!(from = %entry.digest, to = %new.digest, "Index entry updated");
            entry.digest = new.digest.clone();
            entry.size = new.size;
            entry.media_type = new.media_type.clone();
            entry.data = None;
        }
    }

    if max_data_size >= 0 {
        for entry in index.manifests.iter_mut().chain(index.subject.iter_mut()) {
            strip_data(entry, max_data_size);
        }
    }

    push_manifest(client, source, target, node).await
}

async fn commit_image(
    client: &dyn RegistryClient,
    source: &ImageReference,
    target: &ImageReference,
    max_data_size: i64,
    node: &mut DagManifest,
) -> Result<Descriptor> {
    let cross_repo = !source.same_repository(target);
    let layers_changed = node.layers.iter().any(|layer| layer.status.is_changed());

    let Manifest::Image(image) = &mut node.manifest else {
        return Err(ModError::Other("image node holds an index".to_string()));
    };

    match node.config.as_mut() {
        Some(config) => {
            if layers_changed && sync_config_layers(&mut config.config, &node.layers)? {
                config.status.mark_replaced();
            }

            if config.is_dirty() {
                let body = config.config.to_vec()?;
                let digest = sha256_digest(&body);
                let pushed = client
                    .blob_put(target, Box::new(Cursor::new(body.clone())))
                    .await?;
                verify_pushed("config", &digest, body.len() as u64, &pushed)?;
                tracing::info!(digest = %digest, size = body.len(), "Pushed config");

                image.config.digest = digest;
                image.config.size = body.len() as u64;
                image.config.data = None;
                config.raw = body;
            } else if cross_repo {
                client.blob_copy(source, target, &image.config).await?;
            }
            config.descriptor = image.config.clone();

            let fits = u64::try_from(max_data_size)
                .is_ok_and(|max| max > 0 && image.config.size <= max);
            if fits && image.config.data.is_none() {
                image.config.data =
                    Some(base64::engine::general_purpose::STANDARD.encode(&config.raw));
            }
        }
        None => {
            if cross_repo {
                client.blob_copy(source, target, &image.config).await?;
            }
        }
    }

    if layers_changed {
        image.layers = node
            .layers
            .iter()
            .filter(|layer| layer.status != ModStatus::Deleted)
            .map(DagLayer::current_descriptor)
            .collect();
    }

    if max_data_size >= 0 {
        for desc in image
            .layers
            .iter_mut()
            .chain(std::iter::once(&mut image.config))
            .chain(image.subject.iter_mut())
        {
            strip_data(desc, max_data_size);
        }
    }

    push_manifest(client, source, target, node).await
}

/// Push the manifest if the target needs it: re-serialized when modified,
/// original bytes when it is new to the target repository or is the tagged
/// root.
async fn push_manifest(
    client: &dyn RegistryClient,
    source: &ImageReference,
    target: &ImageReference,
    node: &mut DagManifest,
) -> Result<Descriptor> {
    let original = Manifest::from_slice(&node.descriptor.media_type, &node.raw)?;
    let modified = node.manifest != original;

    let (body, descriptor) = if modified {
        let body = node.manifest.to_vec()?;
        let mut descriptor = node.descriptor.clone();
        descriptor.digest = sha256_digest(&body);
        descriptor.size = body.len() as u64;
        descriptor.data = None;
        (body, descriptor)
    } else {
        (node.raw.clone(), node.descriptor.clone())
    };

    let retag = node.top && target.tag.is_some();
    if !modified && !retag && source.same_repository(target) {
        tracing::debug!(digest = %descriptor.digest, "Manifest unchanged, not pushed");
        return Ok(descriptor);
    }

    let reference = match (&target.tag, node.top) {
        (Some(tag), true) => target.with_tag(tag.clone()),
        _ => target.with_digest(descriptor.digest.clone()),
    };
    let pushed = client
        .manifest_put(&reference, &descriptor.media_type, &body)
        .await?;
    verify_pushed("manifest", &descriptor.digest, descriptor.size, &pushed)?;

    tracing::info!(
        reference = %reference,
        digest = %descriptor.digest,
        modified,
        "Pushed manifest"
    );

    node.raw = body;
    if modified {
        node.status.mark_replaced();
    }
    Ok(descriptor)
}

fn verify_pushed(kind: &str, digest: &str, size: u64, pushed: &Descriptor) -> Result<()> {
    if pushed.digest != digest {
        return Err(ModError::ConsistencyError(format!(
            "{} digest mismatch, pushed {}, expected {}",
            kind, pushed.digest, digest
        )));
    }
    if pushed.size != size {
        return Err(ModError::ConsistencyError(format!(
            "{} size mismatch, pushed {}, expected {}",
            kind, pushed.size, size
        )));
    }
    Ok(())
}

/// Drop inline data from a descriptor larger than `max_data_size`. A
/// negative limit leaves data alone.
fn strip_data(desc: &mut Descriptor, max_data_size: i64) -> bool {
    let Ok(max) = u64::try_from(max_data_size) else {
        return false;
    };
    if desc.data.is_some() && desc.size > max {
        desc.data = None;
        return true;
    }
    false
}

/// Bring `rootfs.diff_ids` and `history` in line with the layer nodes.
///
/// Replaced layers take their uncompressed digest, deleted layers lose
/// their diff id and the matching non-empty history entry, added layers
/// append a diff id and get a history entry in place. Returns whether the
/// config changed.
pub fn sync_config_layers(config: &mut ImageConfig, layers: &[DagLayer]) -> Result<bool> {
    let fetched = layers
        .iter()
        .filter(|layer| layer.status != ModStatus::Added)
        .count();
    if config.rootfs.diff_ids.len() != fetched {
        return Err(ModError::ConsistencyError(format!(
            "config lists {} diff ids for {} layers",
            config.rootfs.diff_ids.len(),
            fetched
        )));
    }

    let before = config.clone();
    let had_history = config.history.is_some();
    let mut history = config.history.take().unwrap_or_default().into_iter();
    let mut new_history = Vec::new();
    let mut diff_ids = Vec::with_capacity(layers.len());
    let mut old_ids = before.rootfs.diff_ids.iter();
    let mut missing_history = false;

    for layer in layers {
        if layer.status == ModStatus::Added {
            diff_ids.push(layer_diff_id(layer)?);
            if had_history {
                new_history.push(History {
                    created_by: Some(ADDED_LAYER_CREATED_BY.to_string()),
                    comment: Some(format!("added layer {}", layer.current_descriptor().digest)),
                    ..Default::default()
                });
            }
            continue;
        }

        let Some(old_id) = old_ids.next() else {
            return Err(ModError::ConsistencyError(
                "more layers than diff ids".to_string(),
            ));
        };

        // Empty-layer entries before this layer's own entry stay in place
        let mut entry = None;
        for item in history.by_ref() {
            if item.is_empty_layer() {
                new_history.push(item);
            } else {
                entry = Some(item);
                break;
            }
        }
        if entry.is_none() && had_history {
            missing_history = true;
        }

        match layer.status {
            ModStatus::Deleted => {}
            ModStatus::Replaced => {
                diff_ids.push(layer_diff_id(layer)?);
                new_history.extend(entry);
            }
            _ => {
                diff_ids.push(old_id.clone());
                new_history.extend(entry);
            }
        }
    }
    new_history.extend(history);

    if missing_history {
        tracing::warn!(
            layers = fetched,
            "Config history has fewer layer entries than diff ids"
        );
    }

    config.rootfs.diff_ids = diff_ids;
    if had_history {
        config.history = Some(new_history);
    }
    Ok(*config != before)
}

/// Uncompressed digest of a layer's current content.
fn layer_diff_id(layer: &DagLayer) -> Result<String> {
    if let Some(digest) = &layer.uncompressed_digest {
        return Ok(digest.clone());
    }
    if !media_type::is_compressed(layer.media_type()) {
        return Ok(layer.current_descriptor().digest);
    }
    Err(ModError::ConsistencyError(format!(
        "uncompressed digest of {} layer {} is unknown",
        layer.status,
        layer.current_descriptor().digest
    )))
}
