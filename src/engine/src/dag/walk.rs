//! Post-order walkers with change propagation.
//!
//! Each walker returns whether anything in the visited subtree changed.
//! A parent whose subtree changed is marked `Replaced`, which is all the
//! commit phase needs to know which manifests to re-serialize.

use a3s_imgmod_core::error::Result;

use super::{DagManifest, DagOciConfig};

/// Visit every manifest node, children before their parent.
///
/// A node whose decoded manifest differs after the visit is marked
/// `Replaced`, as is every ancestor of a changed node.
pub fn walk_manifests<F>(node: &mut DagManifest, visit: &mut F) -> Result<bool>
where
    F: FnMut(&mut DagManifest) -> Result<()>,
{
    let mut changed = false;
    for child in node.children.iter_mut() {
        if walk_manifests(child, visit)? {
            changed = true;
        }
    }

    let before = node.manifest.clone();
    visit(node)?;
    if node.manifest != before {
        tracing::debug!(digest = %node.descriptor.digest, "Manifest modified");
        changed = true;
    }

    if changed || node.status.is_changed() {
        node.status.mark_replaced();
        changed = true;
    }
    Ok(changed)
}

/// Visit every config node once, in depth-first manifest order.
///
/// A config whose decoded content differs after the visit is marked
/// `Replaced` along with its owning manifest and that manifest's ancestors.
pub fn walk_configs<F>(node: &mut DagManifest, visit: &mut F) -> Result<bool>
where
    F: FnMut(&mut DagOciConfig) -> Result<()>,
{
    let mut changed = false;
    for child in node.children.iter_mut() {
        if walk_configs(child, visit)? {
            changed = true;
        }
    }

    if let Some(config) = node.config.as_mut() {
        let before = config.config.clone();
        visit(config)?;
        if config.config != before {
            tracing::debug!(digest = %config.descriptor.digest, "Config modified");
            config.status.mark_replaced();
        }
        if config.is_dirty() {
            changed = true;
        }
    }

    if changed {
        node.status.mark_replaced();
    }
    Ok(changed)
}

/// Propagate layer, config, and child changes up to the root.
///
/// Run after the layer phase, which records changes on layer nodes only.
pub fn ripple(node: &mut DagManifest) -> bool {
    let mut changed = node.status.is_changed();

    for child in node.children.iter_mut() {
        if ripple(child) {
            changed = true;
        }
    }
    if node.config.as_ref().is_some_and(DagOciConfig::is_dirty) {
        changed = true;
    }
    if node.layers.iter().any(|layer| layer.status.is_changed()) {
        changed = true;
    }

    if changed {
        node.status.mark_replaced();
    }
    changed
}
