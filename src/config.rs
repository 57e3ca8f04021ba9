//! Run configuration.
//!
//! Defaults follow the directory conventions of the batch layout (`./jars`, `./tars`,
//! `./projects`). A TOML file can override any subset of fields, and command-line flags
//! override the file.
//!
//! ```toml
//! mode = "tar"
//! jobs = 4
//! min_blob_size = 1048576
//!
//! [decompiler]
//! command = ["java", "-jar", "/opt/cfr/cfr.jar"]
//! timeout_secs = 120
//! ```

use crate::layers::DEFAULT_MIN_BLOB_SIZE;
use crate::materializer::MaterializeOptions;
use crate::unpacker::TarTool;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which input directory a run consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Application archives (`*.jar`, `*.war`) from the jars directory
    #[default]
    Jar,
    /// Container image exports (`*.tar`) from the tars directory
    Tar,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecompilerConfig {
    pub enabled: bool,
    /// Program and arguments; the class file path is appended
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["java".to_string(), "-jar".to_string(), "cfr.jar".to_string()],
            timeout_secs: 60,
        }
    }
}

impl DecompilerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub jars_dir: PathBuf,
    pub tars_dir: PathBuf,
    pub projects_dir: PathBuf,
    pub project_suffix: String,
    /// Parent of per-item working directories; system temp when unset
    pub work_dir: Option<PathBuf>,
    pub jobs: usize,
    pub min_blob_size: u64,
    pub tar_tool: TarTool,
    pub java_release: String,
    pub decompile_inner_classes: bool,
    pub decompiler: DecompilerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Jar,
            jars_dir: PathBuf::from("./jars"),
            tars_dir: PathBuf::from("./tars"),
            projects_dir: PathBuf::from("./projects"),
            project_suffix: "_source".to_string(),
            work_dir: None,
            jobs: 1,
            min_blob_size: DEFAULT_MIN_BLOB_SIZE,
            tar_tool: TarTool::Native,
            java_release: "1.8".to_string(),
            decompile_inner_classes: true,
            decompiler: DecompilerConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Directory scanned for inputs in the configured mode.
    pub fn input_dir(&self) -> &Path {
        match self.mode {
            Mode::Jar => &self.jars_dir,
            Mode::Tar => &self.tars_dir,
        }
    }

    pub fn input_extensions(&self) -> &'static [&'static str] {
        match self.mode {
            Mode::Jar => crate::selector::APPLICATION_ARCHIVE_EXTENSIONS,
            Mode::Tar => &["tar"],
        }
    }

    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            java_release: self.java_release.clone(),
            decompile_inner_classes: self.decompile_inner_classes,
        }
    }
}
