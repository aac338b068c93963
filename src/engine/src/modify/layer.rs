//! Layer content rewriting and blob transfer.
//!
//! A layer is rewritten in one streaming pass: the blob is decompressed,
//! each tar entry runs through the entry steps, and surviving entries are
//! written to a spool file through a tap that records the uncompressed
//! digest, the recompressor, and a second tap that records the blob digest.
//!
//! ```text
//! blob ─► decoder ─► tar reader ─► entry steps ─► tar writer
//!                                                     │
//!        spool file ◄─ raw digest ◄─ gzip ◄─ uncompressed digest
//! ```

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use a3s_imgmod_core::error::{ModError, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::options::RunConfig;
use super::steps::{LayerEntryStep, StepContext, TarEntry};
use crate::dag::{DagLayer, ModStatus};
use crate::oci::{media_type, BlobReader, Descriptor, DigestWriter, RegistryClient};

/// PAX keys the tar writer derives from the header and names itself.
const REGENERATED_PAX_KEYS: &[&str] = &["path", "linkpath", "size"];

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// Spooling and recompression settings for one rewrite.
#[derive(Debug, Clone)]
pub(crate) struct RewriteSettings {
    pub temp_dir: Option<PathBuf>,
    pub compression_level: u32,
    /// Produce output even when no entry changed, because the layer's
    /// incoming stream was already modified and has been consumed
    pub keep_output: bool,
}

#[derive(Debug)]
pub(crate) enum RewriteOutcome {
    /// No entry changed; the original blob still stands
    Unchanged,
    /// No entry survived
    Emptied,
    Rewritten {
        file: File,
        descriptor: Descriptor,
        uncompressed_digest: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamFormat {
    Plain,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl StreamFormat {
    fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(GZIP_MAGIC) {
            StreamFormat::Gzip
        } else if magic.starts_with(BZIP2_MAGIC) {
            StreamFormat::Bzip2
        } else if magic.starts_with(XZ_MAGIC) {
            StreamFormat::Xz
        } else if magic.starts_with(ZSTD_MAGIC) {
            StreamFormat::Zstd
        } else {
            StreamFormat::Plain
        }
    }
}

/// Wrap a blob in a decoder chosen by its leading bytes. Uncompressed
/// media types are passed through untouched. Dropping the returned reader
/// drops the blob reader it owns.
fn decompress(layer_media_type: &str, input: BlobReader) -> Result<Box<dyn Read + Send>> {
    if !media_type::is_compressed(layer_media_type) {
        return Ok(input);
    }

    let mut reader = BufReader::new(input);
    let format = StreamFormat::detect(reader.fill_buf()?);
    match format {
        StreamFormat::Gzip => Ok(Box::new(MultiGzDecoder::new(reader))),
        StreamFormat::Bzip2 => Ok(Box::new(bzip2::read::BzDecoder::new(reader))),
        StreamFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        StreamFormat::Zstd => Err(ModError::OciImageError(
            "zstd compressed layers are not supported".to_string(),
        )),
        StreamFormat::Plain => Ok(Box::new(reader)),
    }
}

/// Output side of a rewrite, compressed or not.
enum Compressor<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::Plain(inner) => Ok(inner),
            Compressor::Gzip(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Plain(inner) => inner.write(buf),
            Compressor::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Plain(inner) => inner.flush(),
            Compressor::Gzip(encoder) => encoder.flush(),
        }
    }
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

fn spool_file(dir: Option<&Path>) -> Result<File> {
    let file = match dir {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    };
    file.map_err(|e| ModError::ResourceError(format!("Failed to create layer spool file: {}", e)))
}

fn resource(context: &'static str) -> impl Fn(io::Error) -> ModError {
    move |e| ModError::ResourceError(format!("{}: {}", context, e))
}

/// Run the entry steps over every entry of `input`.
///
/// The input is read with the layer's current media type and the output is
/// compressed to match it.
pub(crate) fn rewrite_layer(
    ctx: &StepContext,
    layer: &DagLayer,
    input: BlobReader,
    steps: &[LayerEntryStep],
    settings: &RewriteSettings,
) -> Result<RewriteOutcome> {
    let layer_media_type = layer.media_type().to_string();
    let mut archive = tar::Archive::new(decompress(&layer_media_type, input)?);

    let raw = DigestWriter::new(spool_file(settings.temp_dir.as_deref())?);
    let compressor = if media_type::is_gzip(&layer_media_type) {
        Compressor::Gzip(GzEncoder::new(raw, Compression::new(settings.compression_level)))
    } else {
        Compressor::Plain(raw)
    };
    let mut builder = tar::Builder::new(DigestWriter::new(compressor));

    let mut changed = false;
    let mut written = 0usize;
    let mut dropped = 0usize;

    let entries = archive.entries().map_err(|e| {
        ModError::OciImageError(format!("Failed to read layer {}: {}", layer.descriptor.digest, e))
    })?;
    for entry in entries {
        let mut entry = entry.map_err(|e| {
            ModError::OciImageError(format!(
                "Corrupt tar entry in layer {}: {}",
                layer.descriptor.digest, e
            ))
        })?;

        let mut header = entry.header().clone();
        header.set_size(entry.size());
        let path = entry.path()?.into_owned();
        let link_name = entry.link_name()?.map(Cow::into_owned);
        let pax = read_pax(&mut entry)?;

        let mut current = TarEntry {
            header,
            path,
            link_name,
            pax,
            content: Box::new(&mut entry),
        };
        let mut deleted = false;
        for step in steps {
            let (next, status) =
                step(ctx, layer, current).map_err(|e| ModError::step("layer-entry", e))?;
            current = next;
            if status.is_changed() {
                changed = true;
            }
            if status == ModStatus::Deleted {
                deleted = true;
                break;
            }
        }

        if deleted {
            tracing::debug!(path = %current.path.display(), "Dropped layer entry");
            dropped += 1;
            continue;
        }
        write_entry(&mut builder, current)?;
        written += 1;
    }

    if written == 0 {
        return Ok(RewriteOutcome::Emptied);
    }
    if !changed && !settings.keep_output {
        return Ok(RewriteOutcome::Unchanged);
    }

    // Close in order: tar trailer, compressor, then the spool file
    let uncompressed = builder
        .into_inner()
        .map_err(resource("Failed to finish tar stream"))?;
    let (compressor, uncompressed_digest, _) = uncompressed.into_parts();
    let raw = compressor
        .finish()
        .map_err(resource("Failed to finish layer compression"))?;
    let (mut file, digest, size) = raw.into_parts();
    file.flush()
        .map_err(resource("Failed to flush layer spool file"))?;
    file.seek(SeekFrom::Start(0))
        .map_err(resource("Failed to rewind layer spool file"))?;

    tracing::debug!(
        from = %layer.descriptor.digest,
        to = %digest,
        entries = written,
        dropped,
        "Rewrote layer"
    );

    Ok(RewriteOutcome::Rewritten {
        file,
        descriptor: Descriptor::new(layer_media_type, digest, size),
        uncompressed_digest,
    })
}

fn read_pax<R: Read>(entry: &mut tar::Entry<'_, R>) -> Result<Vec<(String, Vec<u8>)>> {
    let mut records = Vec::new();
    if let Some(extensions) = entry.pax_extensions()? {
        for extension in extensions {
            let extension = extension?;
            let key = extension.key().map_err(|e| {
                ModError::OciImageError(format!("Invalid PAX key in layer entry: {}", e))
            })?;
            if !REGENERATED_PAX_KEYS.contains(&key) {
                records.push((key.to_string(), extension.value_bytes().to_vec()));
            }
        }
    }
    Ok(records)
}

fn write_entry<W: Write>(builder: &mut tar::Builder<W>, entry: TarEntry<'_>) -> Result<()> {
    let TarEntry {
        mut header,
        path,
        link_name,
        pax,
        content,
    } = entry;

    let records: Vec<(&str, &[u8])> = pax
        .iter()
        .filter(|(key, _)| !REGENERATED_PAX_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.as_str(), value.as_slice()))
        .collect();
    if !records.is_empty() {
        builder.append_pax_extensions(records)?;
    }

    if let Some(target) = link_name {
        header.set_size(0);
        builder.append_link(&mut header, &path, &target)?;
        return Ok(());
    }

    let size = header.size()?;
    let mut counted = CountingReader {
        inner: content.take(size),
        count: 0,
    };
    builder.append_data(&mut header, &path, &mut counted)?;

    let mut rest = counted.inner.into_inner();
    let mut trailing = [0u8; 1];
    if counted.count != size || rest.read(&mut trailing)? != 0 {
        return Err(ModError::ConsistencyError(format!(
            "entry {} content does not match its declared size {}",
            path.display(),
            size
        )));
    }
    Ok(())
}

/// Run the layer phase for one layer: stream steps, entry rewrite, and the
/// push or copy that gets its blob into the target repository.
pub(crate) async fn process_layer(
    client: &dyn RegistryClient,
    run: &RunConfig,
    ctx: &StepContext,
    layer: &mut DagLayer,
) -> Result<()> {
    if layer.status == ModStatus::Deleted {
        tracing::debug!(digest = %layer.descriptor.digest, "Skipping deleted layer");
        return Ok(());
    }
    if layer.is_external() {
        tracing::debug!(digest = %layer.descriptor.digest, "Skipping external layer");
        return Ok(());
    }

    let ctx = match &layer.source {
        Some(source) => StepContext {
            source: source.clone(),
            ..ctx.clone()
        },
        None => ctx.clone(),
    };

    let mut reader: Option<BlobReader> = None;
    if !run.layer_steps.is_empty() {
        let mut current = client.blob_get(&ctx.source, &layer.descriptor).await?;
        for step in &run.layer_steps {
            current = step(&ctx, &mut *layer, current).map_err(|e| ModError::step("layer", e))?;
        }
        reader = Some(current);
    }

    if !run.entry_steps.is_empty() && layer.status != ModStatus::Deleted && layer.is_known_tar() {
        let input = match reader.take() {
            Some(reader) => reader,
            None => client.blob_get(&ctx.source, &layer.descriptor).await?,
        };
        let settings = RewriteSettings {
            temp_dir: run.engine.temp_dir.clone(),
            compression_level: run.engine.compression_level,
            keep_output: matches!(layer.status, ModStatus::Added | ModStatus::Replaced),
        };
        let steps = run.entry_steps.clone();
        let snapshot = layer.clone();
        let step_ctx = ctx.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            rewrite_layer(&step_ctx, &snapshot, input, &steps, &settings)
        })
        .await
        .map_err(|e| ModError::ResourceError(format!("Layer rewrite task failed: {}", e)))??;

        match outcome {
            RewriteOutcome::Unchanged => {}
            RewriteOutcome::Emptied => {
                tracing::info!(digest = %layer.descriptor.digest, "Layer emptied, removing");
                layer.status = ModStatus::Deleted;
                return Ok(());
            }
            RewriteOutcome::Rewritten {
                file,
                descriptor,
                uncompressed_digest,
            } => {
                layer.new_descriptor = Some(descriptor);
                layer.uncompressed_digest = Some(uncompressed_digest);
                layer.status.mark_replaced();
                reader = Some(Box::new(file));
            }
        }
    }

    match (layer.status, reader) {
        (ModStatus::Added | ModStatus::Replaced, Some(reader)) => {
            push_layer(client, &ctx, layer, reader).await
        }
        (ModStatus::Unchanged | ModStatus::Added, _) if !ctx.source.same_repository(&ctx.target) => {
            let descriptor = layer.current_descriptor();
            client.blob_copy(&ctx.source, &ctx.target, &descriptor).await?;
            tracing::debug!(
                digest = %descriptor.digest,
                from = %ctx.source.repository_name(),
                to = %ctx.target.repository_name(),
                "Copied layer"
            );
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Upload new layer content and reconcile the registry's answer with what
/// was computed locally.
async fn push_layer(
    client: &dyn RegistryClient,
    ctx: &StepContext,
    layer: &mut DagLayer,
    reader: BlobReader,
) -> Result<()> {
    let pushed = client.blob_put(&ctx.target, reader).await?;

    let media_type = layer.descriptor.media_type.clone();
    let new = layer
        .new_descriptor
        .get_or_insert_with(|| Descriptor::new(media_type, "", 0));

    if new.digest.is_empty() {
        new.digest = pushed.digest.clone();
    } else if new.digest != pushed.digest {
        return Err(ModError::ConsistencyError(format!(
            "layer digest mismatch, pushed {}, expected {}",
            pushed.digest, new.digest
        )));
    }
    if new.size == 0 {
        new.size = pushed.size;
    } else if new.size != pushed.size {
        return Err(ModError::ConsistencyError(format!(
            "layer size mismatch, pushed {}, expected {}",
            pushed.size, new.size
        )));
    }

    tracing::info!(
        digest = %new.digest,
        size = new.size,
        status = %layer.status,
        "Pushed layer"
    );
    Ok(())
}
