//! Options that configure a modification run.
//!
//! An option is applied once, before any walk, with the run configuration
//! and the fetched root manifest. The built-in options cover the target,
//! inline data, and step registration; step catalogs build their own
//! options on top of [`RunConfig`]'s registration methods.

use std::sync::Arc;

use a3s_imgmod_core::config::ModConfig;
use a3s_imgmod_core::error::{ModError, Result};

use super::steps::{
    layer_entry_step, ConfigStep, LayerEntryStep, LayerStep, ManifestStep, StepContext, TarEntry,
};
use crate::dag::{DagLayer, DagManifest, DagOciConfig, ModStatus};
use crate::oci::{BlobReader, ImageReference};

/// Configures a run. Options run in the order given and the first error
/// stops the run before anything is walked.
pub type ModOption = Box<dyn FnOnce(&mut RunConfig, &mut DagManifest) -> Result<()> + Send>;

/// Accumulated configuration for one run.
pub struct RunConfig {
    pub(crate) manifest_steps: Vec<ManifestStep>,
    pub(crate) config_steps: Vec<ConfigStep>,
    pub(crate) layer_steps: Vec<LayerStep>,
    pub(crate) entry_steps: Vec<LayerEntryStep>,
    /// Where the result is pushed
    pub target: ImageReference,
    /// Inline data limit: `-1` leaves data fields alone, otherwise data is
    /// stripped from larger descriptors and small configs are embedded
    pub max_data_size: i64,
    /// Visit layers even without layer steps
    pub force_layer_walk: bool,
    pub engine: ModConfig,
}

impl RunConfig {
    pub fn new(target: ImageReference) -> Self {
        Self {
            manifest_steps: Vec::new(),
            config_steps: Vec::new(),
            layer_steps: Vec::new(),
            entry_steps: Vec::new(),
            target,
            max_data_size: -1,
            force_layer_walk: false,
            engine: ModConfig::default(),
        }
    }

    pub fn add_manifest_step(&mut self, step: ManifestStep) {
        self.manifest_steps.push(step);
    }

    pub fn add_config_step(&mut self, step: ConfigStep) {
        self.config_steps.push(step);
    }

    pub fn add_layer_step(&mut self, step: LayerStep) {
        self.layer_steps.push(step);
    }

    pub fn add_entry_step(&mut self, step: LayerEntryStep) {
        self.entry_steps.push(step);
    }

    pub fn has_manifest_steps(&self) -> bool {
        !self.manifest_steps.is_empty()
    }

    pub fn has_config_steps(&self) -> bool {
        !self.config_steps.is_empty()
    }

    pub fn has_layer_steps(&self) -> bool {
        !self.layer_steps.is_empty() || !self.entry_steps.is_empty()
    }

    /// Layers are visited when there is something to run on them or when
    /// they have to reach a different repository.
    pub fn needs_layer_walk(&self, source: &ImageReference) -> bool {
        self.has_layer_steps() || self.force_layer_walk || !source.same_repository(&self.target)
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("manifest_steps", &self.manifest_steps.len())
            .field("config_steps", &self.config_steps.len())
            .field("layer_steps", &self.layer_steps.len())
            .field("entry_steps", &self.entry_steps.len())
            .field("target", &self.target)
            .field("max_data_size", &self.max_data_size)
            .field("force_layer_walk", &self.force_layer_walk)
            .finish()
    }
}

/// Push the result to `target` instead of the source repository by digest.
///
/// A tagged target is pushed by tag; an untagged target is pushed by
/// digest. A target pinned to a digest without a tag is rejected since the
/// result's digest is not known up front.
pub fn with_target(target: ImageReference) -> ModOption {
    Box::new(move |run: &mut RunConfig, _: &mut DagManifest| {
        if target.digest.is_some() && target.tag.is_none() {
            return Err(ModError::OptionError(format!(
                "target {} is pinned to a digest; use a tag or a bare repository",
                target
            )));
        }
        run.target = target;
        Ok(())
    })
}

/// Set the inline data limit. `-1` leaves data fields alone.
pub fn with_data(max_data_size: i64) -> ModOption {
    Box::new(move |run: &mut RunConfig, _: &mut DagManifest| {
        if max_data_size < -1 {
            return Err(ModError::OptionError(format!(
                "inline data limit {} must be -1 or greater",
                max_data_size
            )));
        }
        run.max_data_size = max_data_size;
        Ok(())
    })
}

pub fn with_manifest_step<F>(step: F) -> ModOption
where
    F: Fn(&StepContext, &mut DagManifest) -> Result<()> + Send + Sync + 'static,
{
    Box::new(move |run: &mut RunConfig, _: &mut DagManifest| {
        run.add_manifest_step(Arc::new(step));
        Ok(())
    })
}

pub fn with_config_step<F>(step: F) -> ModOption
where
    F: Fn(&StepContext, &mut DagOciConfig) -> Result<()> + Send + Sync + 'static,
{
    Box::new(move |run: &mut RunConfig, _: &mut DagManifest| {
        run.add_config_step(Arc::new(step));
        Ok(())
    })
}

pub fn with_layer_step<F>(step: F) -> ModOption
where
    F: Fn(&StepContext, &mut DagLayer, BlobReader) -> Result<BlobReader> + Send + Sync + 'static,
{
    Box::new(move |run: &mut RunConfig, _: &mut DagManifest| {
        run.add_layer_step(Arc::new(step));
        Ok(())
    })
}

pub fn with_layer_entry_step<F>(step: F) -> ModOption
where
    F: for<'a> Fn(&StepContext, &DagLayer, TarEntry<'a>) -> Result<(TarEntry<'a>, ModStatus)>
        + Send
        + Sync
        + 'static,
{
    Box::new(move |run: &mut RunConfig, _: &mut DagManifest| {
        run.add_entry_step(layer_entry_step(step));
        Ok(())
    })
}

/// Visit layers even when no layer step is registered.
pub fn with_layer_walk() -> ModOption {
    Box::new(|run: &mut RunConfig, _: &mut DagManifest| {
        run.force_layer_walk = true;
        Ok(())
    })
}

/// Use `config` for spooling and recompression.
pub fn with_engine_config(config: ModConfig) -> ModOption {
    Box::new(move |run: &mut RunConfig, _: &mut DagManifest| {
        config
            .validate()
            .map_err(|e| ModError::OptionError(e.to_string()))?;
        run.engine = config;
        Ok(())
    })
}
