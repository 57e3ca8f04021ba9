//! Single-archive unpacking into a destination directory.
//!
//! [`ArchiveUnpacker::unpack`] handles ZIP-based application archives in process and
//! TAR-based payloads through the configured [`TarTool`]. TAR payloads from container
//! exports carry no reliable extension, so every TAR unpack first tries gzip and only
//! falls back to plain tar when gzip is rejected.
//!
//! Unpacking is never additive: the destination is wiped and recreated before each
//! attempt, so unpacking twice into the same directory leaves the same file set as
//! unpacking once.

use crate::error::UnpackError;
use clap::ValueEnum;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use tar_rs as tar;

/// How TAR payloads get unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TarTool {
    /// In-process extraction with the `tar` and `flate2` crates
    #[default]
    Native,
    /// The external `tar` program found on PATH
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
}

impl ArchiveFormat {
    /// Guesses the format from the file extension. Anything that is not a known
    /// ZIP-based extension is treated as TAR, which covers extension-less OCI blobs.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("jar") | Some("war") | Some("ear") | Some("zip") => ArchiveFormat::Zip,
            _ => ArchiveFormat::Tar,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TarCompression {
    Gzip,
    Plain,
}

pub struct ArchiveUnpacker {
    tar_tool: TarTool,
    tar_program: Option<PathBuf>,
}

impl ArchiveUnpacker {
    /// Resolves `tar` from PATH when the system backend is chosen.
    pub fn new(tar_tool: TarTool) -> Self {
        let tar_program = match tar_tool {
            TarTool::Native => None,
            TarTool::System => which::which("tar").ok(),
        };
        Self::with_tar_program(tar_tool, tar_program)
    }

    /// Uses `tar_program` as is; `None` means no system `tar` was found.
    pub fn with_tar_program(tar_tool: TarTool, tar_program: Option<PathBuf>) -> Self {
        Self {
            tar_tool,
            tar_program,
        }
    }

    pub fn tar_tool(&self) -> TarTool {
        self.tar_tool
    }

    /// Checks that TAR payloads can be unpacked at all. Call sites that need TAR
    /// must check this once before processing anything.
    pub fn ensure_tar_available(&self) -> Result<(), UnpackError> {
        match (self.tar_tool, &self.tar_program) {
            (TarTool::Native, _) => Ok(()),
            (TarTool::System, Some(_)) => Ok(()),
            (TarTool::System, None) => Err(UnpackError::ToolUnavailable("tar".to_string())),
        }
    }

    pub fn unpack(
        &self,
        archive: &Path,
        dest: &Path,
        format_hint: Option<ArchiveFormat>,
    ) -> Result<(), UnpackError> {
        if !archive.is_file() {
            return Err(UnpackError::NotFound(archive.to_path_buf()));
        }

        match format_hint.unwrap_or_else(|| ArchiveFormat::from_path(archive)) {
            ArchiveFormat::Zip => self.unpack_zip(archive, dest),
            ArchiveFormat::Tar => self.unpack_tar(archive, dest),
        }
    }

    pub fn unpack_zip(&self, archive: &Path, dest: &Path) -> Result<(), UnpackError> {
        prepare_destination(dest)?;
        log::debug!("Unpacking zip {} into {}", archive.display(), dest.display());

        extract_zip(archive, dest).map_err(|e| UnpackError::Corrupt {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Gzip first, plain tar on rejection.
    pub fn unpack_tar(&self, archive: &Path, dest: &Path) -> Result<(), UnpackError> {
        self.unpack_layer(archive, dest).map(|_| ())
    }

    /// Unpacks a container layer. Whiteout markers are not written; their paths,
    /// relative to `dest`, are returned so they can be applied to lower layers.
    pub fn unpack_layer(&self, archive: &Path, dest: &Path) -> Result<Vec<PathBuf>, UnpackError> {
        self.ensure_tar_available()?;

        let mut last_error = String::new();
        for compression in [TarCompression::Gzip, TarCompression::Plain] {
            prepare_destination(dest)?;
            log::debug!(
                "Unpacking {} as {:?} tar into {}",
                archive.display(),
                compression,
                dest.display()
            );

            let attempt = match (&self.tar_program, self.tar_tool) {
                (Some(program), TarTool::System) => {
                    run_tar_program(program, archive, dest, compression)
                        .and_then(|()| take_whiteout_markers(dest).map_err(anyhow::Error::from))
                }
                _ => {
                    let mut whiteouts = Vec::new();
                    extract_tar_native(archive, dest, compression, &mut whiteouts)
                        .map(|_| whiteouts)
                        .map_err(anyhow::Error::from)
                }
            };

            match attempt {
                Ok(whiteouts) => return Ok(whiteouts),
                Err(e) => {
                    log::debug!(
                        "{:?} tar rejected {}: {}",
                        compression,
                        archive.display(),
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        // Leave nothing half-written behind a failed unpack
        fs::remove_dir_all(dest).ok();
        Err(UnpackError::Corrupt {
            path: archive.to_path_buf(),
            reason: last_error,
        })
    }
}

fn prepare_destination(dest: &Path) -> Result<(), UnpackError> {
    let wrap = |source| UnpackError::Destination {
        path: dest.to_path_buf(),
        source,
    };

    if fs::symlink_metadata(dest).is_ok() {
        fs::remove_dir_all(dest).map_err(wrap)?;
    }
    fs::create_dir_all(dest).map_err(wrap)
}

/// Normalizes an archive entry path so it stays inside the destination
fn normalize_entry_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => out.push(c),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    out
}

fn extract_zip(archive: &Path, dest: &Path) -> anyhow::Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let rel_path = match entry.enclosed_name() {
            Some(path) => normalize_entry_path(&path),
            None => {
                log::debug!("Skipping zip entry with unsafe name: {}", entry.name());
                continue;
            }
        };
        if rel_path.as_os_str().is_empty() {
            continue;
        }

        let out_path = dest.join(&rel_path);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;
    }

    Ok(())
}

struct PendingHardlink {
    dest: PathBuf,
    target: PathBuf,
}

/// Unpacks regular files, directories and hard links. Symlinks and special files are
/// skipped since only regular files take part in the flattened tree.
fn extract_tar_native(
    archive: &Path,
    dest: &Path,
    compression: TarCompression,
    whiteouts: &mut Vec<PathBuf>,
) -> io::Result<usize> {
    let file = File::open(archive)?;
    let reader: Box<dyn Read> = match compression {
        TarCompression::Gzip => Box::new(GzDecoder::new(BufReader::new(file))),
        TarCompression::Plain => Box::new(BufReader::new(file)),
    };
    let mut tar = tar::Archive::new(reader);

    let mut written = 0usize;
    let mut pending_hardlinks = Vec::new();

    for entry_result in tar.entries()? {
        let mut entry = entry_result?;
        let rel_path = normalize_entry_path(&entry.path()?);
        if rel_path.as_os_str().is_empty() {
            continue;
        }
        if is_whiteout(&rel_path) {
            whiteouts.push(rel_path);
            continue;
        }
        let out_path = dest.join(&rel_path);
        let entry_type = entry.header().entry_type();

        match entry_type {
            tar::EntryType::Directory => {
                fs::create_dir_all(&out_path)?;
            }
            tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::GNUSparse => {
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                // Later layers of the same archive may overwrite earlier entries
                if let Ok(metadata) = fs::symlink_metadata(&out_path) {
                    if metadata.is_dir() {
                        fs::remove_dir_all(&out_path)?;
                    } else {
                        fs::remove_file(&out_path)?;
                    }
                }
                let mut out_file = File::create(&out_path)?;
                io::copy(&mut entry, &mut out_file)?;
                written += 1;
            }
            tar::EntryType::Link => {
                if let Some(link_name) = entry.link_name()? {
                    pending_hardlinks.push(PendingHardlink {
                        dest: out_path,
                        target: dest.join(normalize_entry_path(&link_name)),
                    });
                }
            }
            other => {
                log::trace!("Skipping tar entry {:?} of type {:?}", rel_path, other);
            }
        }
    }

    for link in pending_hardlinks {
        if !link.target.is_file() {
            log::debug!(
                "Skipping hard link with missing target: {} -> {}",
                link.dest.display(),
                link.target.display()
            );
            continue;
        }
        if let Some(parent) = link.dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&link.target, &link.dest)?;
        written += 1;
    }

    Ok(written)
}

pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Overlay whiteout markers (`.wh.<name>`, `.wh..wh..opq`) delete files of lower
/// layers and are never part of the layer's own content.
pub fn is_whiteout(rel_path: &Path) -> bool {
    rel_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(WHITEOUT_PREFIX))
        .unwrap_or(false)
}

/// Removes the markers a system `tar` wrote as plain files and returns their paths
/// relative to `dest`.
fn take_whiteout_markers(dest: &Path) -> io::Result<Vec<PathBuf>> {
    let markers: Vec<PathBuf> = walkdir::WalkDir::new(dest)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir() && is_whiteout(e.path()))
        .map(|e| e.into_path())
        .collect();

    let mut whiteouts = Vec::with_capacity(markers.len());
    for marker in markers {
        fs::remove_file(&marker)?;
        if let Ok(rel_path) = marker.strip_prefix(dest) {
            whiteouts.push(rel_path.to_path_buf());
        }
    }
    Ok(whiteouts)
}

fn run_tar_program(
    program: &Path,
    archive: &Path,
    dest: &Path,
    compression: TarCompression,
) -> anyhow::Result<()> {
    let mode = match compression {
        TarCompression::Gzip => "-xzf",
        TarCompression::Plain => "-xf",
    };

    let output = Command::new(program)
        .arg(mode)
        .arg(archive)
        .arg("-C")
        .arg(dest)
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("tar {} exited with {}: {}", mode, output.status, stderr.trim());
    }

    Ok(())
}
