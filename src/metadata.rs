//! Image name and tag recovery from a container export.
//!
//! `docker save` writes a `manifest.json` whose entries carry `RepoTags`; OCI layouts
//! write an `index.json` whose manifest descriptors carry the reference as an
//! annotation. Either one is enough to name the exported application archive
//! `<image>-<tag>.jar`.

use anyhow::{Context, Result};
use oci_spec::image::{ImageIndex, ImageManifest};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const CONTAINERD_IMAGE_NAME: &str = "io.containerd.image.name";
const OCI_REF_NAME: &str = "org.opencontainers.image.ref.name";

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    #[serde(default, rename = "Config")]
    pub config: String,
    #[serde(default, rename = "RepoTags")]
    pub repo_tags: Option<Vec<String>>,
    #[serde(default, rename = "Layers")]
    pub layers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTag {
    pub image: String,
    pub tag: String,
}

impl ImageTag {
    /// Splits a reference like `registry.example.com/team/app:1.2` into `app` / `1.2`.
    /// References without a tag get `latest`; digests (`@sha256:...`) are dropped.
    pub fn parse(reference: &str) -> Option<Self> {
        let reference = reference.split('@').next().unwrap_or(reference).trim();
        if reference.is_empty() {
            return None;
        }

        let last_segment = reference.rsplit('/').next().unwrap_or(reference);
        let (image, tag) = match last_segment.split_once(':') {
            Some((image, tag)) => (image, tag),
            None => (last_segment, "latest"),
        };

        let image = sanitize(image);
        let tag = sanitize(tag);
        if image.is_empty() {
            return None;
        }

        Some(Self {
            image,
            tag: if tag.is_empty() {
                "latest".to_string()
            } else {
                tag
            },
        })
    }

    pub fn archive_name(&self, extension: &str) -> String {
        format!("{}-{}.{}", self.image, self.tag, extension)
    }
}

/// Keeps `[A-Za-z0-9._-]`; any run of other characters becomes a single `-`.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            out.push(c);
            last_dash = c == '-';
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }

    out.trim_matches('-').to_string()
}

pub fn read_manifest(root: &Path) -> Result<Vec<ManifestEntry>> {
    let manifest_path = root.join("manifest.json");
    let content = fs::read_to_string(&manifest_path).context("Failed to read manifest.json")?;
    serde_json::from_str(&content).context("Failed to parse manifest.json")
}

fn tag_from_manifest(root: &Path) -> Option<ImageTag> {
    let manifest = read_manifest(root)
        .map_err(|e| log::debug!("No usable manifest.json: {:#}", e))
        .ok()?;

    manifest
        .iter()
        .filter_map(|entry| entry.repo_tags.as_ref())
        .flatten()
        .find_map(|t| ImageTag::parse(t))
}

fn tag_from_index(root: &Path) -> Option<ImageTag> {
    let index = ImageIndex::from_file(root.join("index.json"))
        .map_err(|e| log::debug!("No usable index.json: {}", e))
        .ok()?;

    index.manifests().iter().find_map(|descriptor| {
        let annotations = descriptor.annotations().as_ref()?;
        annotations
            .get(CONTAINERD_IMAGE_NAME)
            .or_else(|| annotations.get(OCI_REF_NAME))
            .and_then(|reference| ImageTag::parse(reference))
    })
}

/// `blobs/<algorithm>/<hex>` for a digest like `sha256:<hex>`.
fn blob_path(digest: &str) -> Option<PathBuf> {
    let (algorithm, hex) = digest.split_once(':')?;
    Some(PathBuf::from("blobs").join(algorithm).join(hex))
}

fn layers_from_index(root: &Path) -> Option<Vec<PathBuf>> {
    let index = ImageIndex::from_file(root.join("index.json"))
        .map_err(|e| log::debug!("No usable index.json: {}", e))
        .ok()?;
    let descriptor = index.manifests().first()?;
    let manifest_path = root.join(blob_path(&descriptor.digest().to_string())?);
    let manifest = ImageManifest::from_file(&manifest_path)
        .map_err(|e| log::debug!("No image manifest at {}: {}", manifest_path.display(), e))
        .ok()?;

    manifest
        .layers()
        .iter()
        .map(|layer| blob_path(&layer.digest().to_string()))
        .collect()
}

/// Layer archives of the first image in the export, bottom layer first, relative to
/// `root`. `None` when the export records no order.
pub fn layer_order(root: &Path) -> Option<Vec<PathBuf>> {
    if root.join("manifest.json").is_file() {
        if let Some(entry) = read_manifest(root).ok()?.into_iter().next() {
            return Some(entry.layers.iter().map(PathBuf::from).collect());
        }
    }
    if root.join("index.json").is_file() {
        return layers_from_index(root);
    }
    None
}

/// Reads the image tag embedded in an unpacked export, if any.
pub fn image_tag(root: &Path) -> Option<ImageTag> {
    if root.join("manifest.json").is_file() {
        if let Some(tag) = tag_from_manifest(root) {
            return Some(tag);
        }
    }
    if root.join("index.json").is_file() {
        return tag_from_index(root);
    }
    None
}
