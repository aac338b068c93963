//! Manifest, index, descriptor, and image config documents.
//!
//! Every document keeps unrecognised fields in a flattened map so a
//! decode/encode cycle never drops data the engine does not model.

use std::collections::BTreeMap;

use a3s_imgmod_core::error::{ModError, Result};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::media_type;

/// Content descriptor: media type, digest, and size of a blob or manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Base64 inline copy of the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            urls: None,
            annotations: None,
            data: None,
            platform: None,
            artifact_type: None,
            extra: Map::new(),
        }
    }

    /// Layers with URLs are served from outside the registry and are never read.
    pub fn is_external(&self) -> bool {
        self.urls.as_ref().is_some_and(|urls| !urls.is_empty())
    }

    /// Same content: media type, digest, and size all match.
    pub fn same_content(&self, other: &Descriptor) -> bool {
        self.digest == other.digest && self.size == other.size && self.media_type == other.media_type
    }
}

/// Platform a manifest list entry targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Single-platform image manifest (Docker schema 2 or OCI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Multi-platform manifest list (Docker) or image index (OCI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded manifest body: either a list of manifests or a leaf image.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Index(ImageIndex),
    Image(ImageManifest),
}

/// Just enough structure to classify a manifest without a media type.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestShape {
    schema_version: Option<u32>,
    media_type: Option<String>,
    manifests: Option<IgnoredAny>,
    config: Option<IgnoredAny>,
}

impl Manifest {
    /// Decode a manifest body.
    ///
    /// The body's own `mediaType` wins over `media_type_hint` (typically the
    /// registry content type); when neither is conclusive the JSON structure
    /// decides.
    pub fn from_slice(media_type_hint: &str, body: &[u8]) -> Result<Self> {
        let shape: ManifestShape = serde_json::from_slice(body)?;

        if shape.schema_version == Some(1) {
            return Err(ModError::OciImageError(
                "Docker schema 1 manifests are not supported".to_string(),
            ));
        }

        let declared = shape
            .media_type
            .as_deref()
            .filter(|mt| !mt.is_empty())
            .unwrap_or(media_type_hint);

        let is_index = if media_type::is_index(declared) {
            true
        } else if media_type::is_image_manifest(declared) {
            false
        } else if matches!(
            media_type::base(declared),
            media_type::DOCKER1_MANIFEST | media_type::DOCKER1_MANIFEST_SIGNED
        ) {
            return Err(ModError::OciImageError(
                "Docker schema 1 manifests are not supported".to_string(),
            ));
        } else if shape.manifests.is_some() {
            true
        } else if shape.config.is_some() {
            false
        } else {
            return Err(ModError::OciImageError(format!(
                "Unrecognised manifest (media type '{}')",
                declared
            )));
        };

        if is_index {
            Ok(Manifest::Index(serde_json::from_slice(body)?))
        } else {
            Ok(Manifest::Image(serde_json::from_slice(body)?))
        }
    }

    /// Encode the manifest body.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let body = match self {
            Manifest::Index(index) => serde_json::to_vec(index)?,
            Manifest::Image(image) => serde_json::to_vec(image)?,
        };
        Ok(body)
    }

    /// Media type declared in the body, or the OCI default for the variant.
    pub fn media_type(&self) -> &str {
        match self {
            Manifest::Index(index) => index.media_type.as_deref().unwrap_or(media_type::OCI1_INDEX),
            Manifest::Image(image) => image
                .media_type
                .as_deref()
                .unwrap_or(media_type::OCI1_MANIFEST),
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Manifest::Index(_))
    }

    pub fn subject_mut(&mut self) -> &mut Option<Descriptor> {
        match self {
            Manifest::Index(index) => &mut index.subject,
            Manifest::Image(image) => &mut image.subject,
        }
    }

    pub fn annotations_mut(&mut self) -> &mut Option<BTreeMap<String, String>> {
        match self {
            Manifest::Index(index) => &mut index.annotations,
            Manifest::Image(image) => &mut image.annotations,
        }
    }
}

/// Image configuration blob (Docker or OCI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ContainerConfig>,
    #[serde(default)]
    pub rootfs: RootFs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<History>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ImageConfig {
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Execution defaults for containers started from the image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Layer diff ids, in layer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub diff_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            kind: "layers".to_string(),
            diff_ids: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// One build step in the image history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl History {
    /// Entries flagged `empty_layer` do not correspond to a layer blob.
    pub fn is_empty_layer(&self) -> bool {
        self.empty_layer.unwrap_or(false)
    }
}
