//! Image modification.
//!
//! [`apply`] fetches an image graph, runs the registered steps over it in
//! three phases, and commits the result:
//!
//! 1. manifest steps, children before parents
//! 2. config steps, once per image config
//! 3. layer steps: whole-blob stream steps, then tar entry steps
//!
//! Steps are registered through [`ModOption`]s and run in registration
//! order. Changes propagate to the root, and only changed manifests get
//! new digests.

mod apply;
mod layer;
mod options;
mod steps;

pub use apply::apply;
pub use options::{
    with_config_step, with_data, with_engine_config, with_layer_entry_step, with_layer_step,
    with_layer_walk, with_manifest_step, with_target, ModOption, RunConfig,
};
pub use steps::{
    layer_entry_step, ConfigStep, LayerEntryStep, LayerStep, ManifestStep, StepContext, TarEntry,
};
