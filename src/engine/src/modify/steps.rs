//! Step contracts.
//!
//! Steps are plain closures registered through options and run in
//! registration order. Each phase has its own signature; all of them see
//! the run's [`StepContext`].

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use a3s_imgmod_core::error::Result;
use tokio_util::sync::CancellationToken;

use crate::dag::{DagLayer, DagManifest, DagOciConfig, ModStatus};
use crate::oci::{BlobReader, ImageReference};

/// What every step can see about the run.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Fires when the caller abandons the run
    pub cancel: CancellationToken,
    /// Repository the node being visited is read from
    pub source: ImageReference,
    /// Repository the result is pushed to
    pub target: ImageReference,
}

impl StepContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Mutates a manifest node in place.
pub type ManifestStep = Arc<dyn Fn(&StepContext, &mut DagManifest) -> Result<()> + Send + Sync>;

/// Mutates a config node in place.
pub type ConfigStep = Arc<dyn Fn(&StepContext, &mut DagOciConfig) -> Result<()> + Send + Sync>;

/// Transforms a whole layer blob stream. A step that changes the content
/// sets the layer's status and, when it knows them, `new_descriptor` and
/// `uncompressed_digest`.
pub type LayerStep =
    Arc<dyn Fn(&StepContext, &mut DagLayer, BlobReader) -> Result<BlobReader> + Send + Sync>;

/// Rewrites one tar entry and reports how it changed. Returning
/// [`ModStatus::Deleted`] drops the entry and skips the remaining steps.
pub type LayerEntryStep = Arc<
    dyn for<'a> Fn(&StepContext, &DagLayer, TarEntry<'a>) -> Result<(TarEntry<'a>, ModStatus)>
        + Send
        + Sync,
>;

/// Box a closure as a [`LayerEntryStep`], pinning down its signature.
pub fn layer_entry_step<F>(step: F) -> LayerEntryStep
where
    F: for<'a> Fn(&StepContext, &DagLayer, TarEntry<'a>) -> Result<(TarEntry<'a>, ModStatus)>
        + Send
        + Sync
        + 'static,
{
    Arc::new(step)
}

/// One entry of a layer being rewritten.
///
/// `header` carries the metadata written back out; its size is the number
/// of bytes `content` must yield. `path` and `link_name` are the full
/// names, which may exceed what the header itself can hold.
pub struct TarEntry<'a> {
    pub header: tar::Header,
    pub path: PathBuf,
    pub link_name: Option<PathBuf>,
    /// PAX records other than the ones the writer regenerates
    pub pax: Vec<(String, Vec<u8>)>,
    pub content: Box<dyn Read + 'a>,
}

impl<'a> TarEntry<'a> {
    /// Swap in new content, updating the header size to match.
    pub fn set_content(&mut self, data: Vec<u8>) {
        self.header.set_size(data.len() as u64);
        self.content = Box::new(std::io::Cursor::new(data));
    }

    pub fn size(&self) -> u64 {
        self.header.size().unwrap_or(0)
    }
}

impl std::fmt::Debug for TarEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarEntry")
            .field("path", &self.path)
            .field("link_name", &self.link_name)
            .field("entry_type", &self.header.entry_type())
            .field("size", &self.size())
            .finish()
    }
}
