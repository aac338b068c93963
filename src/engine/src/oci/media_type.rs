//! Media types recognised by the modification engine.

/// Docker schema 2 image manifest.
pub const DOCKER2_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker schema 2 manifest list.
pub const DOCKER2_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker schema 1 manifest (unsupported).
pub const DOCKER1_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v1+json";
/// Docker schema 1 signed manifest (unsupported).
pub const DOCKER1_MANIFEST_SIGNED: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";
/// OCI image manifest.
pub const OCI1_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI1_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Docker image config.
pub const DOCKER2_IMAGE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
/// OCI image config.
pub const OCI1_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// Docker uncompressed layer.
pub const DOCKER2_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar";
/// Docker gzip layer.
pub const DOCKER2_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
/// Docker foreign (non-distributable) gzip layer.
pub const DOCKER2_FOREIGN_LAYER: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";
/// OCI uncompressed layer.
pub const OCI1_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
/// OCI gzip layer.
pub const OCI1_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// OCI zstd layer.
pub const OCI1_LAYER_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
/// OCI non-distributable gzip layer.
pub const OCI1_FOREIGN_LAYER_GZIP: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";

/// Tar layer types whose entries the rewrite engine can process.
pub const KNOWN_TAR: &[&str] = &[DOCKER2_LAYER, DOCKER2_LAYER_GZIP, OCI1_LAYER, OCI1_LAYER_GZIP];

/// Image configuration types the engine decodes.
pub const KNOWN_CONFIG: &[&str] = &[DOCKER2_IMAGE_CONFIG, OCI1_IMAGE_CONFIG];

/// Manifest types requested from registries.
pub const ACCEPTED_MANIFESTS: &[&str] = &[
    OCI1_INDEX,
    DOCKER2_MANIFEST_LIST,
    OCI1_MANIFEST,
    DOCKER2_MANIFEST,
];

/// Media types are compared without parameters (`; charset=...`).
pub fn base(media_type: &str) -> &str {
    media_type.split(';').next().unwrap_or("").trim()
}

pub fn is_known_tar(media_type: &str) -> bool {
    KNOWN_TAR.contains(&base(media_type))
}

pub fn is_known_config(media_type: &str) -> bool {
    KNOWN_CONFIG.contains(&base(media_type))
}

pub fn is_index(media_type: &str) -> bool {
    matches!(base(media_type), OCI1_INDEX | DOCKER2_MANIFEST_LIST)
}

pub fn is_image_manifest(media_type: &str) -> bool {
    matches!(base(media_type), OCI1_MANIFEST | DOCKER2_MANIFEST)
}

/// Uncompressed tar layers are the only ones read without a decoder.
pub fn is_compressed(media_type: &str) -> bool {
    !matches!(base(media_type), OCI1_LAYER | DOCKER2_LAYER)
}

pub fn is_gzip(media_type: &str) -> bool {
    matches!(
        base(media_type),
        OCI1_LAYER_GZIP | DOCKER2_LAYER_GZIP | DOCKER2_FOREIGN_LAYER | OCI1_FOREIGN_LAYER_GZIP
    )
}
