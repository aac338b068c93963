//! The modification pipeline: acquire, walk, commit.

use a3s_imgmod_core::error::{ModError, Result};
use tokio_util::sync::CancellationToken;

use super::layer::process_layer;
use super::options::{ModOption, RunConfig};
use super::steps::StepContext;
use crate::dag::{dag_get, dag_put, ripple, walk_configs, walk_manifests};
use crate::oci::{ImageReference, RegistryClient};

fn check_cancelled(cancel: &CancellationToken, at: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ModError::Cancelled(format!("before {}", at)));
    }
    Ok(())
}

/// Modify the image at `source` and push the result.
///
/// Without options the result is pushed by digest to the source
/// repository, which for an image nothing changed is a no-op. The returned
/// reference is the target, carrying the result's digest when the target
/// has no tag.
pub async fn apply(
    cancel: &CancellationToken,
    client: &dyn RegistryClient,
    source: &ImageReference,
    options: Vec<ModOption>,
) -> Result<ImageReference> {
    check_cancelled(cancel, "acquisition")?;
    let mut dag = dag_get(client, source, None).await?;
    dag.top = true;
    tracing::info!(
        source = %source,
        digest = %dag.descriptor.digest,
        nodes = dag.node_count(),
        "Acquired image"
    );

    let mut run = RunConfig::new(source.repository_only());
    for option in options {
        option(&mut run, &mut dag)?;
    }
    tracing::debug!(run = ?run, "Options applied");

    let ctx = StepContext {
        cancel: cancel.clone(),
        source: source.clone(),
        target: run.target.clone(),
    };

    if run.has_manifest_steps() {
        check_cancelled(cancel, "manifest phase")?;
        let steps = &run.manifest_steps;
        walk_manifests(&mut dag, &mut |node| {
            check_cancelled(cancel, "manifest step")?;
            let node_ctx = match &node.source {
                Some(override_source) => StepContext {
                    source: override_source.clone(),
                    ..ctx.clone()
                },
                None => ctx.clone(),
            };
            for step in steps {
                step(&node_ctx, &mut *node).map_err(|e| ModError::step("manifest", e))?;
            }
            Ok(())
        })?;
    }

    if run.has_config_steps() {
        check_cancelled(cancel, "config phase")?;
        let steps = &run.config_steps;
        walk_configs(&mut dag, &mut |config| {
            check_cancelled(cancel, "config step")?;
            for step in steps {
                step(&ctx, &mut *config).map_err(|e| ModError::step("config", e))?;
            }
            Ok(())
        })?;
    }

    // Steps may add or re-source layers, so decide after they ran
    if run.needs_layer_walk(source) || dag.has_foreign_layers() {
        check_cancelled(cancel, "layer phase")?;
        for leaf in dag.leaves_mut() {
            let leaf_ctx = match &leaf.source {
                Some(override_source) => StepContext {
                    source: override_source.clone(),
                    ..ctx.clone()
                },
                None => ctx.clone(),
            };
            for layer in leaf.layers.iter_mut() {
                check_cancelled(cancel, "layer")?;
                process_layer(client, &run, &leaf_ctx, layer).await?;
            }
        }
    }

    let changed = ripple(&mut dag);
    check_cancelled(cancel, "commit")?;
    let descriptor = dag_put(client, source, &run.target, run.max_data_size, &mut dag).await?;

    let result = match run.target.tag {
        Some(_) => run.target.clone(),
        None => run.target.with_digest(descriptor.digest.clone()),
    };
    tracing::info!(
        source = %source,
        result = %result,
        digest = %descriptor.digest,
        changed,
        "Image modified"
    );
    Ok(result)
}
