//! Batch orchestration: one run over an input directory.
//!
//! [`BatchRunner::run`] checks preconditions once, then feeds every input (sorted by
//! file name) through its pipeline:
//! - `jar` mode: unpack the application archive, materialize a project.
//! - `tar` mode: unpack the container export, flatten its layers, pick the main
//!   application archive, export it to the jars directory, unpack and materialize it.
//!
//! Each item gets its own [`ExtractionSession`], released on every exit path. A failing
//! or panicking item is recorded in the [`BatchResult`] and never stops the batch.

use crate::config::{Config, Mode};
use crate::decompiler::{CommandDecompiler, Decompiler};
use crate::error::{ItemError, PreconditionError};
use crate::layers::LayerWalker;
use crate::materializer::{ProjectMaterializer, SourceProject};
use crate::metadata;
use crate::naming;
use crate::notifier::Notifier;
use crate::selector;
use crate::session::{ExtractionSession, LiveSessions};
use crate::unpacker::{ArchiveFormat, ArchiveUnpacker};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub input: PathBuf,
    pub cause: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failures: Vec<ItemFailure>,
    pub projects: Vec<PathBuf>,
    pub output_root: PathBuf,
}

impl BatchResult {
    fn record_success(&mut self, project: &SourceProject) {
        self.succeeded += 1;
        self.projects.push(project.root.clone());
    }

    fn record_failure(&mut self, input: &Path, cause: String) {
        self.failed += 1;
        self.failures.push(ItemFailure {
            input: input.to_path_buf(),
            cause,
        });
    }
}

impl fmt::Display for BatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total:     {}", self.total)?;
        writeln!(f, "Succeeded: {}", self.succeeded)?;
        writeln!(f, "Failed:    {}", self.failed)?;
        if self.cancelled > 0 {
            writeln!(f, "Cancelled: {}", self.cancelled)?;
        }
        for failure in &self.failures {
            writeln!(f, "  - {}: {}", failure.input.display(), failure.cause)?;
        }
        write!(f, "Output:    {}", self.output_root.display())
    }
}

/// Regular files directly inside `dir` whose extension is in `extensions`
/// (case-insensitive), sorted by file name.
pub fn discover_inputs(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
            .unwrap_or(false);
        if matches {
            inputs.push(path);
        }
    }
    inputs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(inputs)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct BatchRunner<'a> {
    config: &'a Config,
    notifier: &'a Notifier,
    unpacker: ArchiveUnpacker,
    decompiler: Option<Box<dyn Decompiler>>,
    cancel: Arc<AtomicBool>,
    sessions: LiveSessions,
}

impl<'a> BatchRunner<'a> {
    /// Builds a runner and probes the configured decompiler once. A missing decompiler
    /// is not an error: class files are then copied into the source tree unchanged.
    pub fn new(config: &'a Config, notifier: &'a Notifier) -> Self {
        let decompiler: Option<Box<dyn Decompiler>> = if !config.decompiler.enabled {
            log::info!("Decompiler disabled, class files will be copied as-is");
            None
        } else {
            match CommandDecompiler::probe(&config.decompiler.command, config.decompiler.timeout())
            {
                Ok(decompiler) => {
                    log::info!("Using decompiler {}", decompiler.name());
                    Some(Box::new(decompiler))
                }
                Err(e) => {
                    log::warn!(
                        "Decompiler unavailable ({:#}); class files will be copied as-is",
                        e
                    );
                    None
                }
            }
        };

        Self {
            config,
            notifier,
            unpacker: ArchiveUnpacker::new(config.tar_tool),
            decompiler,
            cancel: Arc::new(AtomicBool::new(false)),
            sessions: LiveSessions::new(),
        }
    }

    /// Replaces the unpacker built from `config.tar_tool`.
    pub fn with_unpacker(mut self, unpacker: ArchiveUnpacker) -> Self {
        self.unpacker = unpacker;
        self
    }

    /// Replaces the probed decompiler.
    pub fn with_decompiler(mut self, decompiler: Option<Box<dyn Decompiler>>) -> Self {
        self.decompiler = decompiler;
        self
    }

    /// Setting the flag stops the batch before the next item starts.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Session directories of the items currently running.
    pub fn live_sessions(&self) -> LiveSessions {
        self.sessions.clone()
    }

    pub fn check_preconditions(&self) -> Result<(), PreconditionError> {
        let input_dir = self.config.input_dir();
        if !input_dir.is_dir() {
            return Err(PreconditionError::MissingInputDir(input_dir.to_path_buf()));
        }
        if self.config.mode == Mode::Tar {
            self.unpacker
                .ensure_tar_available()
                .map_err(|_| PreconditionError::MissingCapability("tar".to_string()))?;
        }
        Ok(())
    }

    pub fn run(&self) -> Result<BatchResult> {
        self.check_preconditions()?;

        let inputs = discover_inputs(self.config.input_dir(), self.config.input_extensions())?;
        let result = Mutex::new(BatchResult {
            total: inputs.len(),
            output_root: self.config.projects_dir.clone(),
            ..BatchResult::default()
        });

        if inputs.is_empty() {
            log::info!(
                "No inputs found in {}",
                self.config.input_dir().display()
            );
            return Ok(into_inner(result));
        }

        fs::create_dir_all(&self.config.projects_dir).with_context(|| {
            format!(
                "Failed to create projects directory {}",
                self.config.projects_dir.display()
            )
        })?;

        let (runnable, duplicates) = self.partition_duplicate_projects(&inputs);
        for input in duplicates {
            lock(&result).record_failure(
                &input,
                "another input maps to the same project directory".to_string(),
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs.max(1))
            .build()
            .context("Failed to build worker pool")?;

        self.notifier.start_batch(runnable.len() as u64);
        pool.install(|| {
            runnable.par_iter().for_each(|input| {
                if self.cancel.load(Ordering::SeqCst) {
                    lock(&result).cancelled += 1;
                    return;
                }

                let name = display_name(input);
                self.notifier.item_started(&name);
                match self.run_item(input) {
                    Ok(project) => {
                        log::info!("{} -> {}", name, project.root.display());
                        lock(&result).record_success(&project);
                        self.notifier.item_finished(&name, true);
                    }
                    Err(e) => {
                        log::error!("{} failed: {}", name, e);
                        lock(&result).record_failure(input, e.to_string());
                        self.notifier.item_finished(&name, false);
                    }
                }
            });
        });
        self.notifier.finish();

        let mut result = into_inner(result);
        result.failures.sort_by(|a, b| a.input.cmp(&b.input));
        result.projects.sort();
        Ok(result)
    }

    /// First input per project name wins; the rest would overwrite its output.
    fn partition_duplicate_projects(&self, inputs: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut seen = HashSet::new();
        inputs.iter().cloned().partition(|input| {
            seen.insert(naming::project_dir_name(input, &self.config.project_suffix))
        })
    }

    fn run_item(&self, input: &Path) -> Result<SourceProject, ItemError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process_item(input))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(ItemError::Fault(panic_message(payload.as_ref()))),
        }
    }

    fn process_item(&self, input: &Path) -> Result<SourceProject, ItemError> {
        let session = ExtractionSession::create(self.config.work_dir.as_deref(), &display_name(input))?
            .tracked_by(&self.sessions);

        let outcome = match self.config.mode {
            Mode::Jar => self.process_application_archive(input, &session),
            Mode::Tar => self.process_container_export(input, &session),
        };

        if let Err(e) = session.close() {
            log::warn!("{:#}", e);
        }
        outcome
    }

    fn process_application_archive(
        &self,
        input: &Path,
        session: &ExtractionSession,
    ) -> Result<SourceProject, ItemError> {
        let app_dir = session.join("app");
        self.unpacker
            .unpack(input, &app_dir, Some(ArchiveFormat::Zip))?;

        self.materialize(&app_dir, input, &display_name(input), &[])
    }

    fn process_container_export(
        &self,
        input: &Path,
        session: &ExtractionSession,
    ) -> Result<SourceProject, ItemError> {
        let export_dir = session.join("export");
        self.unpacker
            .unpack(input, &export_dir, Some(ArchiveFormat::Tar))?;

        let report = LayerWalker::new(&self.unpacker, self.config.min_blob_size)
            .materialize_layers(&export_dir)?;
        if !report.discovered() {
            log::info!(
                "No layers in {}, searching the export as-is",
                display_name(input)
            );
        }

        let candidates = selector::collect_candidates(&export_dir);
        let selected = selector::select_main(&candidates)
            .map_err(|_| ItemError::NoArtifactFound(input.to_path_buf()))?;
        log::info!(
            "Selected {} ({} bytes) out of {} candidates",
            selected.relative.display(),
            selected.size,
            candidates.len()
        );

        let extension = selected
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "jar".to_string());
        let tag = metadata::image_tag(&export_dir);
        let archive_name = naming::exported_archive_name(input, tag.as_ref(), &extension);

        fs::create_dir_all(&self.config.jars_dir).with_context(|| {
            format!("Failed to create {}", self.config.jars_dir.display())
        })?;
        let exported = self.config.jars_dir.join(&archive_name);
        fs::copy(&selected.path, &exported)
            .with_context(|| format!("Failed to export {}", exported.display()))?;
        log::info!("Exported {}", exported.display());

        let app_dir = session.join("app");
        self.unpacker
            .unpack(&selected.path, &app_dir, Some(ArchiveFormat::Zip))?;

        // Archives the image ships beside the application become its dependencies
        let dependencies: Vec<PathBuf> = candidates
            .iter()
            .filter(|c| c.path != selected.path)
            .map(|c| c.path.clone())
            .collect();

        self.materialize(&app_dir, input, &archive_name, &dependencies)
    }

    fn materialize(
        &self,
        app_dir: &Path,
        input: &Path,
        archive_name: &str,
        dependencies: &[PathBuf],
    ) -> Result<SourceProject, ItemError> {
        let project_dir = self
            .config
            .projects_dir
            .join(naming::project_dir_name(input, &self.config.project_suffix));
        let options = self.config.materialize_options();

        let project = ProjectMaterializer::new(self.decompiler.as_deref(), &options)
            .with_dependencies(dependencies)
            .materialize(app_dir, &project_dir, archive_name)?;
        Ok(project)
    }
}

fn lock(result: &Mutex<BatchResult>) -> std::sync::MutexGuard<'_, BatchResult> {
    result.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn into_inner(result: Mutex<BatchResult>) -> BatchResult {
    result
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
