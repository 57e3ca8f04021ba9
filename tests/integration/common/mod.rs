//! Common utilities for integration tests

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use jar2source::config::DecompilerConfig;
use jar2source::{Config, Decompiler, Mode};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

pub const MAIN_CLASS: &[u8] = b"\xCA\xFE\xBA\xBE\x00\x00\x00\x34 Main";
pub const EMBEDDED_POM: &str = "<project><artifactId>demo</artifactId></project>\n";

/// Input, output and scratch directories of one test run.
pub struct Workspace {
    pub root: TempDir,
}

#[allow(dead_code)]
impl Workspace {
    pub fn new() -> Result<Self> {
        let root = TempDir::new()?;
        fs::create_dir_all(root.path().join("jars"))?;
        fs::create_dir_all(root.path().join("tars"))?;
        Ok(Self { root })
    }

    pub fn jars(&self) -> PathBuf {
        self.root.path().join("jars")
    }

    pub fn tars(&self) -> PathBuf {
        self.root.path().join("tars")
    }

    pub fn projects(&self) -> PathBuf {
        self.root.path().join("projects")
    }

    pub fn work(&self) -> PathBuf {
        self.root.path().join("work")
    }

    /// Config pointing at this workspace, with the external decompiler disabled.
    pub fn config(&self, mode: Mode) -> Config {
        Config {
            mode,
            jars_dir: self.jars(),
            tars_dir: self.tars(),
            projects_dir: self.projects(),
            work_dir: Some(self.work()),
            decompiler: DecompilerConfig {
                enabled: false,
                ..DecompilerConfig::default()
            },
            ..Config::default()
        }
    }

    /// True when no extraction session survived the run.
    pub fn work_is_empty(&self) -> Result<bool> {
        if !self.work().exists() {
            return Ok(true);
        }
        Ok(fs::read_dir(self.work())?.next().is_none())
    }
}

/// Builds a ZIP archive in memory. Entries are stored uncompressed so archive sizes
/// follow the payload sizes.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (name, data) in entries {
        writer.start_file(*name, options)?;
        writer.write_all(data)?;
    }

    Ok(writer.finish()?.into_inner())
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    fs::write(path, zip_bytes(entries)?)?;
    Ok(())
}

/// Builds a plain TAR archive in memory with regular-file entries.
pub fn tar_bytes(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut builder = tar_rs::Builder::new(Vec::new());

    for (name, data) in entries {
        let mut header = tar_rs::Header::new_gnu();
        header.set_entry_type(tar_rs::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, *data)?;
    }

    Ok(builder.into_inner()?)
}

pub fn write_tar(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    fs::write(path, tar_bytes(entries)?)?;
    Ok(())
}

pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// The application archive most scenarios start from: a root class, a package
/// with an inner class, a bundled library, a config file and an embedded pom.
pub fn demo_jar_bytes() -> Result<Vec<u8>> {
    let helper = zip_bytes(&[("Helper.class", &b"\xCA\xFE\xBA\xBE helper"[..])])?;
    zip_bytes(&[
        ("META-INF/MANIFEST.MF", &b"Manifest-Version: 1.0\nMain-Class: com.acme.Main\n"[..]),
        ("META-INF/maven/com.acme/demo/pom.xml", EMBEDDED_POM.as_bytes()),
        ("com/acme/Main.class", MAIN_CLASS),
        ("com/acme/Util.class", &b"\xCA\xFE\xBA\xBE util"[..]),
        ("com/acme/Util$Inner.class", &b"\xCA\xFE\xBA\xBE inner"[..]),
        ("application.properties", &b"server.port=8080\n"[..]),
        ("lib/helper-1.0.jar", helper.as_slice()),
    ])
}

pub fn write_demo_jar(path: &Path) -> Result<()> {
    fs::write(path, demo_jar_bytes()?)?;
    Ok(())
}

/// An application archive of at least `size` bytes, carrying one class file.
pub fn padded_jar_bytes(class_name: &str, size: usize) -> Result<Vec<u8>> {
    let padding = vec![0u8; size];
    zip_bytes(&[
        (class_name, &b"\xCA\xFE\xBA\xBE padded"[..]),
        ("static/padding.bin", padding.as_slice()),
    ])
}

/// Emits a one-line source file naming the class it was given.
pub struct StubDecompiler;

impl Decompiler for StubDecompiler {
    fn name(&self) -> &str {
        "stub"
    }

    fn decompile(&self, class_file: &Path) -> Result<String> {
        let name = class_file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(format!("// decompiled {}\nclass {} {{}}\n", name, name))
    }
}

/// Panics on every class, standing in for a stage that faults unexpectedly.
pub struct PanickingDecompiler;

impl Decompiler for PanickingDecompiler {
    fn name(&self) -> &str {
        "panicking"
    }

    fn decompile(&self, class_file: &Path) -> Result<String> {
        panic!("decompiler crashed on {}", class_file.display());
    }
}
