//! In-memory image graph.
//!
//! An image is held as an owned tree: a manifest list owns its child
//! manifests, an image manifest owns its config and layers. Nothing points
//! back up the tree. Walkers report whether a subtree changed and the caller
//! marks the parent, so digest changes ripple to the root without shared
//! mutable state.
//!
//! ```text
//! DagManifest (index, top)
//! ├── DagManifest (linux/amd64)
//! │   ├── DagOciConfig
//! │   └── DagLayer × N
//! └── DagManifest (linux/arm64)
//!     ├── DagOciConfig
//!     └── DagLayer × N
//! ```

mod acquire;
mod commit;
mod walk;

pub use acquire::dag_get;
pub use commit::{dag_put, sync_config_layers};
pub use walk::{ripple, walk_configs, walk_manifests};

use crate::oci::media_type;
use crate::oci::{Descriptor, ImageConfig, ImageIndex, ImageManifest, ImageReference, Manifest};

/// How a node, layer, or tar entry differs from what was fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ModStatus {
    #[default]
    Unchanged,
    Added,
    Replaced,
    Deleted,
}

impl ModStatus {
    pub fn is_changed(self) -> bool {
        self != ModStatus::Unchanged
    }

    /// Record a modification without ever reverting an earlier one.
    pub fn mark_replaced(&mut self) {
        if *self == ModStatus::Unchanged {
            *self = ModStatus::Replaced;
        }
    }
}

impl std::fmt::Display for ModStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModStatus::Unchanged => "unchanged",
            ModStatus::Added => "added",
            ModStatus::Replaced => "replaced",
            ModStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A manifest list or a single-platform image manifest.
///
/// A list populates `children`; an image manifest populates `config` and
/// `layers`. The layer list written at commit comes from `layers`, so steps
/// drop a layer by marking its node [`ModStatus::Deleted`] rather than by
/// editing the manifest body.
#[derive(Debug, Clone)]
pub struct DagManifest {
    /// Descriptor the manifest was fetched by
    pub descriptor: Descriptor,
    /// Bytes as fetched, pushed verbatim while the node is unchanged
    pub raw: Vec<u8>,
    pub manifest: Manifest,
    pub status: ModStatus,
    pub children: Vec<DagManifest>,
    pub config: Option<DagOciConfig>,
    pub layers: Vec<DagLayer>,
    /// Root of the traversal
    pub top: bool,
    /// Repository to read this manifest's blobs from instead of the run source
    pub source: Option<ImageReference>,
}

impl DagManifest {
    pub fn is_index(&self) -> bool {
        self.manifest.is_index()
    }

    pub fn image_manifest(&self) -> Option<&ImageManifest> {
        match &self.manifest {
            Manifest::Image(image) => Some(image),
            Manifest::Index(_) => None,
        }
    }

    pub fn image_manifest_mut(&mut self) -> Option<&mut ImageManifest> {
        match &mut self.manifest {
            Manifest::Image(image) => Some(image),
            Manifest::Index(_) => None,
        }
    }

    pub fn index_mut(&mut self) -> Option<&mut ImageIndex> {
        match &mut self.manifest {
            Manifest::Index(index) => Some(index),
            Manifest::Image(_) => None,
        }
    }

    /// Image manifests under this node in depth-first order, including the
    /// node itself when it is one.
    pub fn leaves_mut(&mut self) -> Vec<&mut DagManifest> {
        if self.children.is_empty() {
            vec![self]
        } else {
            self.children
                .iter_mut()
                .flat_map(|child| child.leaves_mut())
                .collect()
        }
    }

    /// True when a step added a layer or pointed one at another repository
    /// anywhere under this node. Such layers have to be visited even when
    /// nothing else asks for the layer phase.
    pub fn has_foreign_layers(&self) -> bool {
        self.layers
            .iter()
            .any(|layer| layer.status == ModStatus::Added || layer.source.is_some())
            || self.children.iter().any(DagManifest::has_foreign_layers)
    }

    /// Count of nodes in this subtree, for logging.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(DagManifest::node_count).sum::<usize>()
    }
}

/// The image config owned by one image manifest.
#[derive(Debug, Clone)]
pub struct DagOciConfig {
    pub descriptor: Descriptor,
    /// Bytes as fetched
    pub raw: Vec<u8>,
    pub config: ImageConfig,
    /// `Replaced` once the decoded config differs from `raw`
    pub status: ModStatus,
}

impl DagOciConfig {
    pub fn is_dirty(&self) -> bool {
        self.status.is_changed()
    }
}

/// One layer at a fixed position in its manifest.
#[derive(Debug, Clone)]
pub struct DagLayer {
    /// Descriptor from the fetched manifest
    pub descriptor: Descriptor,
    pub status: ModStatus,
    /// Set once content changes. An empty digest or a zero size means the
    /// value is not known yet and is taken from the registry on push.
    pub new_descriptor: Option<Descriptor>,
    /// Digest of the uncompressed tar, the config's diff id
    pub uncompressed_digest: Option<String>,
    /// Repository to read this layer from instead of the manifest's source
    pub source: Option<ImageReference>,
}

impl DagLayer {
    pub fn new(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            status: ModStatus::Unchanged,
            new_descriptor: None,
            uncompressed_digest: None,
            source: None,
        }
    }

    /// A layer inserted by a step, optionally borrowed from another repository.
    pub fn added(
        descriptor: Descriptor,
        uncompressed_digest: impl Into<String>,
        source: Option<ImageReference>,
    ) -> Self {
        Self {
            descriptor,
            status: ModStatus::Added,
            new_descriptor: None,
            uncompressed_digest: Some(uncompressed_digest.into()),
            source,
        }
    }

    /// Layers with URLs live outside the registry and are never opened.
    pub fn is_external(&self) -> bool {
        self.descriptor.is_external()
    }

    /// Media type after any content change.
    pub fn media_type(&self) -> &str {
        match &self.new_descriptor {
            Some(desc) if !desc.media_type.is_empty() => &desc.media_type,
            _ => &self.descriptor.media_type,
        }
    }

    pub fn is_known_tar(&self) -> bool {
        media_type::is_known_tar(self.media_type())
    }

    /// Descriptor to write into the manifest: the original with any new
    /// media type, digest, and size merged in. Inline data no longer matches
    /// changed content and is dropped.
    pub fn current_descriptor(&self) -> Descriptor {
        let mut desc = self.descriptor.clone();
        if let Some(new) = &self.new_descriptor {
            if !new.media_type.is_empty() {
                desc.media_type = new.media_type.clone();
            }
            if !new.digest.is_empty() && new.digest != desc.digest {
                desc.digest = new.digest.clone();
                desc.data = None;
            }
            if new.size > 0 {
                desc.size = new.size;
            }
        }
        desc
    }
}

#[cfg(test)]
pub(crate) mod fixtures;
