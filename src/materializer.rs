//! Turns an unpacked application archive into a Maven-style source project.
//!
//! Layout of a materialized project:
//!
//! ```text
//! <project>/
//!   pom.xml                 embedded descriptor copied verbatim, or synthesized
//!   lib/                    nested application archives, copied verbatim
//!   src/main/java/          one source file per decompiled class, by package
//!   src/main/resources/     configuration files and META-INF contents
//!   src/main/webapp/        web content and WEB-INF descriptors
//! ```
//!
//! Every step is optional: an archive without resources simply yields no resources
//! tree. Per-file failures are logged and skipped, so a partly decompiled project is
//! still produced. Without a decompiler the class files themselves are copied into
//! the source tree.

use crate::decompiler::Decompiler;
use crate::descriptor;
use crate::plan::{self, FileRole, ResourceKind};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SOURCE_ROOT: &str = "src/main/java";
pub const RESOURCES_ROOT: &str = "src/main/resources";
pub const WEBAPP_ROOT: &str = "src/main/webapp";
pub const DEPENDENCY_DIR: &str = "lib";
pub const DESCRIPTOR_FILE: &str = "pom.xml";

#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    /// Compiler level written into a synthesized descriptor
    pub java_release: String,
    /// Decompile inner classes whose outer class produced no source
    pub decompile_inner_classes: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            java_release: "1.8".to_string(),
            decompile_inner_classes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriptorOrigin {
    Embedded,
    #[default]
    Synthesized,
    /// Neither descriptor could be written
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeStats {
    pub decompiled: usize,
    pub copied_classes: usize,
    pub inner_covered: usize,
    pub decompile_failures: usize,
    pub resources: usize,
    pub metadata_files: usize,
    pub dependencies: usize,
    pub copy_failures: usize,
    pub descriptor: DescriptorOrigin,
}

#[derive(Debug, Clone)]
pub struct SourceProject {
    pub root: PathBuf,
    pub stats: MaterializeStats,
}

impl SourceProject {
    pub fn source_root(&self) -> PathBuf {
        self.root.join(SOURCE_ROOT)
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE)
    }
}

struct TreeFile {
    path: PathBuf,
    relative: PathBuf,
}

struct ClassUnit {
    path: PathBuf,
    source: PathBuf,
    inner: bool,
}

pub struct ProjectMaterializer<'a> {
    decompiler: Option<&'a dyn Decompiler>,
    options: &'a MaterializeOptions,
    extra_dependencies: &'a [PathBuf],
}

impl<'a> ProjectMaterializer<'a> {
    pub fn new(decompiler: Option<&'a dyn Decompiler>, options: &'a MaterializeOptions) -> Self {
        Self {
            decompiler,
            options,
            extra_dependencies: &[],
        }
    }

    /// Archives found next to the application archive. They are copied into `lib/`
    /// after the archive's own dependencies, under the same first-wins naming.
    pub fn with_dependencies(mut self, archives: &'a [PathBuf]) -> Self {
        self.extra_dependencies = archives;
        self
    }

    /// Builds a fresh project at `output_dir` from the files under `tree_root`.
    /// An existing project at that path is removed first.
    pub fn materialize(
        &self,
        tree_root: &Path,
        output_dir: &Path,
        archive_name: &str,
    ) -> Result<SourceProject> {
        if fs::symlink_metadata(output_dir).is_ok() {
            log::debug!("Replacing existing project {}", output_dir.display());
            fs::remove_dir_all(output_dir).with_context(|| {
                format!("Failed to remove existing project {}", output_dir.display())
            })?;
        }
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create project {}", output_dir.display()))?;

        let files = enumerate(tree_root);
        let mut stats = MaterializeStats::default();

        self.place_classes(&files, output_dir, &mut stats);
        self.copy_resources(&files, output_dir, &mut stats);
        self.copy_dependencies(&files, output_dir, &mut stats);
        stats.descriptor = self.write_descriptor(&files, output_dir, archive_name, &mut stats);

        log::info!(
            "Project {}: {} decompiled, {} classes copied, {} decompile failures, {} resources, {} dependencies, {:?} descriptor",
            output_dir.display(),
            stats.decompiled,
            stats.copied_classes,
            stats.decompile_failures,
            stats.resources + stats.metadata_files,
            stats.dependencies,
            stats.descriptor
        );

        Ok(SourceProject {
            root: output_dir.to_path_buf(),
            stats,
        })
    }

    fn place_classes(&self, files: &[TreeFile], output_dir: &Path, stats: &mut MaterializeStats) {
        let source_root = output_dir.join(SOURCE_ROOT);
        let (outer, inner): (Vec<ClassUnit>, Vec<ClassUnit>) = files
            .iter()
            .filter_map(|f| match plan::classify(&f.relative) {
                FileRole::ClassFile { source, inner } => Some(ClassUnit {
                    path: f.path.clone(),
                    source,
                    inner,
                }),
                _ => None,
            })
            .partition(|unit| !unit.inner);

        let decompiler = match self.decompiler {
            Some(decompiler) => decompiler,
            None => {
                for unit in outer.iter().chain(inner.iter()) {
                    let dest = source_root.join(unit.source.with_extension(plan::CLASS_EXTENSION));
                    match copy_file(&unit.path, &dest) {
                        Ok(()) => stats.copied_classes += 1,
                        Err(e) => {
                            stats.copy_failures += 1;
                            log::warn!("{:#}", e);
                        }
                    }
                }
                return;
            }
        };

        // Outer classes first: their output usually already contains the inner ones
        for unit in &outer {
            self.decompile_unit(decompiler, unit, &source_root, stats);
        }

        for unit in &inner {
            if !self.options.decompile_inner_classes {
                continue;
            }
            if source_root.join(plan::outer_source_path(&unit.source)).is_file() {
                stats.inner_covered += 1;
                continue;
            }
            self.decompile_unit(decompiler, unit, &source_root, stats);
        }
    }

    fn decompile_unit(
        &self,
        decompiler: &dyn Decompiler,
        unit: &ClassUnit,
        source_root: &Path,
        stats: &mut MaterializeStats,
    ) {
        log::trace!("Decompiling {}", unit.path.display());
        let written = decompiler
            .decompile(&unit.path)
            .and_then(|text| write_text(&source_root.join(&unit.source), &text));

        match written {
            Ok(()) => stats.decompiled += 1,
            Err(e) => {
                stats.decompile_failures += 1;
                log::warn!(
                    "{} failed on {}: {:#}",
                    decompiler.name(),
                    unit.source.display(),
                    e
                );
            }
        }
    }

    fn copy_resources(&self, files: &[TreeFile], output_dir: &Path, stats: &mut MaterializeStats) {
        for file in files {
            let dest = match plan::classify(&file.relative) {
                FileRole::Resource {
                    kind: ResourceKind::Config,
                    relative,
                } => output_dir.join(RESOURCES_ROOT).join(relative),
                FileRole::Resource {
                    kind: ResourceKind::Web,
                    relative,
                } => output_dir.join(WEBAPP_ROOT).join(relative),
                FileRole::Metadata => output_dir.join(RESOURCES_ROOT).join(&file.relative),
                _ => continue,
            };

            let is_metadata = file.relative.starts_with(plan::METADATA_DIR);
            match copy_file(&file.path, &dest) {
                Ok(()) if is_metadata => stats.metadata_files += 1,
                Ok(()) => stats.resources += 1,
                Err(e) => {
                    stats.copy_failures += 1;
                    log::warn!("{:#}", e);
                }
            }
        }
    }

    fn copy_dependencies(
        &self,
        files: &[TreeFile],
        output_dir: &Path,
        stats: &mut MaterializeStats,
    ) {
        let lib_dir = output_dir.join(DEPENDENCY_DIR);
        let mut seen = HashSet::new();

        let bundled = files
            .iter()
            .filter(|f| plan::classify(&f.relative) == FileRole::DependencyArchive)
            .map(|f| f.path.as_path());
        let sources = bundled.chain(self.extra_dependencies.iter().map(PathBuf::as_path));

        for path in sources {
            let name = match path.file_name() {
                Some(name) => name.to_os_string(),
                None => continue,
            };
            if !seen.insert(name.clone()) {
                log::warn!(
                    "Duplicate dependency name {}, keeping the first copy",
                    path.display()
                );
                continue;
            }

            match copy_file(path, &lib_dir.join(&name)) {
                Ok(()) => stats.dependencies += 1,
                Err(e) => {
                    stats.copy_failures += 1;
                    log::warn!("{:#}", e);
                }
            }
        }
    }

    fn write_descriptor(
        &self,
        files: &[TreeFile],
        output_dir: &Path,
        archive_name: &str,
        stats: &mut MaterializeStats,
    ) -> DescriptorOrigin {
        let dest = output_dir.join(DESCRIPTOR_FILE);

        let embedded = files.iter().find(|f| {
            plan::classify(&f.relative) == FileRole::Provenance
                && f.relative.file_name().and_then(|n| n.to_str()) == Some(DESCRIPTOR_FILE)
        });

        if let Some(embedded) = embedded {
            match copy_file(&embedded.path, &dest) {
                Ok(()) => {
                    log::debug!("Recovered descriptor {}", embedded.relative.display());
                    return DescriptorOrigin::Embedded;
                }
                Err(e) => log::warn!("{:#}; synthesizing a descriptor instead", e),
            }
        }

        let pom = descriptor::synthesize_pom(archive_name, &self.options.java_release);
        match write_text(&dest, &pom) {
            Ok(()) => DescriptorOrigin::Synthesized,
            Err(e) => {
                stats.copy_failures += 1;
                log::warn!("{:#}; project has no descriptor", e);
                DescriptorOrigin::Missing
            }
        }
    }
}

/// Regular files under `root`, sorted by path.
fn enumerate(root: &Path) -> Vec<TreeFile> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let relative = e.path().strip_prefix(root).ok()?.to_path_buf();
            Some(TreeFile {
                path: e.into_path(),
                relative,
            })
        })
        .collect()
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

fn write_text(to: &Path, text: &str) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(to, text.as_bytes()).with_context(|| format!("Failed to write {}", to.display()))
}
