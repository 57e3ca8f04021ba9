//! Flattening of nested container layers.
//!
//! An unpacked container export hides its filesystem one or two archive levels down:
//! - Docker `save` output keeps one `layer.tar` per layer directory.
//! - OCI layouts keep content-addressed blobs under `blobs/sha256/`, with no extension
//!   telling layers from configs or compressed from plain payloads.
//!
//! [`LayerWalker::materialize_layers`] runs both passes and unpacks whatever it finds
//! next to the original, so a later walk over the root sees every layer's files.
//! Whiteouts of an upper layer delete the matching files from the layers below it,
//! following the layer order recorded in the export.

use crate::error::UnpackError;
use crate::metadata;
use crate::unpacker::{ArchiveUnpacker, WHITEOUT_PREFIX};
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DOCKER_LAYER_FILE: &str = "layer.tar";
pub const OCI_BLOB_DIR: &str = "blobs/sha256";
pub const DEFAULT_MIN_BLOB_SIZE: u64 = 1024 * 1024;
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LayerReport {
    pub docker_layers: usize,
    pub oci_blobs_extracted: usize,
    pub oci_blobs_skipped: usize,
    pub failures: usize,
    /// Lower-layer paths deleted by whiteout markers
    pub whiteouts_applied: usize,
}

impl LayerReport {
    /// True when either pass found something to flatten.
    pub fn discovered(&self) -> bool {
        self.docker_layers > 0 || self.oci_blobs_extracted > 0
    }
}

struct ExtractedLayer {
    /// Layer archive relative to the export root
    archive: PathBuf,
    dest: PathBuf,
    whiteouts: Vec<PathBuf>,
}

pub struct LayerWalker<'a> {
    unpacker: &'a ArchiveUnpacker,
    min_blob_size: u64,
}

impl<'a> LayerWalker<'a> {
    pub fn new(unpacker: &'a ArchiveUnpacker, min_blob_size: u64) -> Self {
        Self {
            unpacker,
            min_blob_size,
        }
    }

    /// Runs the Docker-layer pass and the OCI-blob pass over `root`.
    ///
    /// When nothing is discovered the caller should still search `root` itself: the
    /// export may be a flat filesystem or an application archive under a `.tar` name.
    pub fn materialize_layers(&self, root: &Path) -> Result<LayerReport> {
        let mut report = LayerReport::default();
        let mut layers = Vec::new();
        self.docker_pass(root, &mut report, &mut layers)?;
        self.oci_pass(root, &mut report, &mut layers)?;
        apply_layer_whiteouts(root, &layers, &mut report);

        log::debug!(
            "Layer walk of {}: {} docker layers, {} blobs extracted, {} blobs skipped, {} failures, {} whiteouts",
            root.display(),
            report.docker_layers,
            report.oci_blobs_extracted,
            report.oci_blobs_skipped,
            report.failures,
            report.whiteouts_applied
        );
        Ok(report)
    }

    fn docker_pass(
        &self,
        root: &Path,
        report: &mut LayerReport,
        layers: &mut Vec<ExtractedLayer>,
    ) -> Result<()> {
        // Collect first so layers unpacked below are not rescanned mid-walk
        let layer_files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() == DOCKER_LAYER_FILE)
            .map(|e| e.into_path())
            .collect();

        for layer in layer_files {
            report.docker_layers += 1;
            let dest = layer
                .parent()
                .unwrap_or(root)
                .join("extracted");

            log::info!("Extracting layer {}", display_relative(root, &layer));
            match self.unpacker.unpack_layer(&layer, &dest) {
                Ok(whiteouts) => layers.push(ExtractedLayer {
                    archive: relative(root, &layer),
                    dest,
                    whiteouts,
                }),
                Err(e) => {
                    report.failures += 1;
                    log::warn!("Failed to extract layer {}: {}", layer.display(), e);
                }
            }
        }

        Ok(())
    }

    fn oci_pass(
        &self,
        root: &Path,
        report: &mut LayerReport,
        layers: &mut Vec<ExtractedLayer>,
    ) -> Result<()> {
        let blob_dir = root.join(OCI_BLOB_DIR);
        if !blob_dir.is_dir() {
            return Ok(());
        }

        let mut blobs = Vec::new();
        for entry in fs::read_dir(&blob_dir)
            .with_context(|| format!("Failed to list {}", blob_dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                blobs.push((entry.path(), entry.metadata()?.len()));
            }
        }
        blobs.sort();

        for (blob, size) in blobs {
            if size < self.min_blob_size {
                log::trace!("Skipping small blob {} ({} bytes)", blob.display(), size);
                report.oci_blobs_skipped += 1;
                continue;
            }

            let mut dest_name = blob.file_name().unwrap_or_default().to_os_string();
            dest_name.push("_extracted");
            let dest = blob_dir.join(dest_name);

            log::info!("Extracting blob {}", display_relative(root, &blob));
            match self.unpacker.unpack_layer(&blob, &dest) {
                Ok(whiteouts) => {
                    report.oci_blobs_extracted += 1;
                    layers.push(ExtractedLayer {
                        archive: relative(root, &blob),
                        dest,
                        whiteouts,
                    });
                }
                Err(UnpackError::ToolUnavailable(tool)) => {
                    anyhow::bail!("Cannot extract OCI blobs: {} is unavailable", tool)
                }
                Err(e) => {
                    report.failures += 1;
                    log::warn!("Blob {} is not a tar payload: {}", blob.display(), e);
                }
            }
        }

        Ok(())
    }
}

/// Applies every layer's whiteouts to the layers below it. Exports that record no
/// layer order keep all files.
fn apply_layer_whiteouts(root: &Path, layers: &[ExtractedLayer], report: &mut LayerReport) {
    if layers.iter().all(|layer| layer.whiteouts.is_empty()) {
        return;
    }
    let order = match metadata::layer_order(root) {
        Some(order) => order,
        None => {
            log::warn!(
                "{} has whiteouts but no layer order, keeping deleted files",
                root.display()
            );
            return;
        }
    };

    let ordered: Vec<&ExtractedLayer> = order
        .iter()
        .filter_map(|archive| layers.iter().find(|layer| &layer.archive == archive))
        .collect();

    for (i, upper) in ordered.iter().enumerate() {
        for marker in &upper.whiteouts {
            for lower in &ordered[..i] {
                match apply_whiteout(&lower.dest, marker) {
                    Ok(removed) => report.whiteouts_applied += removed,
                    Err(e) => log::warn!(
                        "Failed to apply whiteout {} to {}: {}",
                        marker.display(),
                        lower.dest.display(),
                        e
                    ),
                }
            }
        }
    }
}

/// Deletes what `marker` hides inside `layer_root`: the named sibling for
/// `.wh.<name>`, every entry of the directory for `.wh..wh..opq`.
fn apply_whiteout(layer_root: &Path, marker: &Path) -> io::Result<usize> {
    let name = match marker.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return Ok(0),
    };
    let dir = layer_root.join(marker.parent().unwrap_or_else(|| Path::new("")));
    if !dir.is_dir() || !stays_inside(layer_root, &dir)? {
        return Ok(0);
    }

    if name == OPAQUE_WHITEOUT {
        let mut removed = 0;
        for entry in fs::read_dir(&dir)? {
            remove_path(&entry?.path())?;
            removed += 1;
        }
        return Ok(removed);
    }

    let hidden = &name[WHITEOUT_PREFIX.len()..];
    if hidden.is_empty() || hidden == "." || hidden == ".." {
        return Ok(0);
    }
    let target = dir.join(hidden);
    if fs::symlink_metadata(&target).is_err() {
        return Ok(0);
    }
    remove_path(&target)?;
    Ok(1)
}

/// False when a symlink inside the layer leads `dir` out of it.
fn stays_inside(layer_root: &Path, dir: &Path) -> io::Result<bool> {
    Ok(dir.canonicalize()?.starts_with(layer_root.canonicalize()?))
}

fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
