//! Picks the "main" application archive out of a flattened extraction tree.
//!
//! The rules are plain functions over path strings so they can be tested without
//! touching the filesystem:
//! - [`is_library_path`] drops anything below a `lib`, `libs` or `dependencies` segment.
//! - [`is_framework_archive`] drops well-known framework and JDK runtime archives.
//! - [`select_main`] applies both, falls back to the unfiltered set if nothing
//!   survives, and keeps the largest remaining archive.
//!
//! Largest-wins is a heuristic: the biggest non-library archive is assumed to be the
//! application bundle. Exports laid out differently (a tiny launcher jar next to a
//! fat library, say) will pick the wrong archive, and that is accepted.

use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// File extensions that mark an application archive.
pub const APPLICATION_ARCHIVE_EXTENSIONS: &[&str] = &["jar", "war"];

const LIBRARY_SEGMENTS: &[&str] = &["lib", "libs", "dependencies"];

const FRAMEWORK_PREFIXES: &[&str] = &[
    "spring-",
    "tomcat-",
    "jackson-",
    "log4j",
    "slf4j-",
    "logback-",
    "commons-",
    "netty-",
    "hibernate-",
    "guava-",
    "jakarta.",
    "javax.",
    "junit-",
    "byte-buddy",
    "snakeyaml-",
    "mysql-connector",
    "postgresql-",
    "aspectj",
    "micrometer-",
    "reactor-",
];

const RUNTIME_ARCHIVES: &[&str] = &[
    "rt.jar",
    "jrt-fs.jar",
    "tools.jar",
    "charsets.jar",
    "jce.jar",
    "jsse.jar",
    "resources.jar",
    "management-agent.jar",
    "dnsns.jar",
    "localedata.jar",
    "cldrdata.jar",
    "nashorn.jar",
    "sunec.jar",
    "sunjce_provider.jar",
    "sunpkcs11.jar",
    "zipfs.jar",
    "jaccess.jar",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateArtifact {
    /// Absolute path on disk
    pub path: PathBuf,
    /// Path relative to the tree root the candidate was found under
    pub relative: PathBuf,
    pub size: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no application archive candidates")]
    NoArtifactFound,
}

pub fn is_application_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            APPLICATION_ARCHIVE_EXTENSIONS
                .iter()
                .any(|known| e.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// True when any directory segment of `relative` is exactly a library directory name.
/// Case-sensitive: `Lib/` does not count.
pub fn is_library_path(relative: &Path) -> bool {
    let parent = match relative.parent() {
        Some(parent) => parent,
        None => return false,
    };
    parent.components().any(|c| match c {
        Component::Normal(seg) => seg
            .to_str()
            .map(|s| LIBRARY_SEGMENTS.contains(&s))
            .unwrap_or(false),
        _ => false,
    })
}

/// True for archives whose file name looks like a framework or JDK runtime archive.
pub fn is_framework_archive(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    RUNTIME_ARCHIVES.contains(&lower.as_str())
        || FRAMEWORK_PREFIXES
            .iter()
            .any(|prefix| lower.starts_with(prefix))
}

fn is_excluded(candidate: &CandidateArtifact) -> bool {
    let file_name = candidate
        .relative
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    is_library_path(&candidate.relative) || is_framework_archive(file_name)
}

/// Returns the largest non-excluded candidate; the first one wins a size tie.
pub fn select_main(candidates: &[CandidateArtifact]) -> Result<&CandidateArtifact, SelectError> {
    if candidates.is_empty() {
        return Err(SelectError::NoArtifactFound);
    }

    let survivors: Vec<&CandidateArtifact> =
        candidates.iter().filter(|c| !is_excluded(c)).collect();

    let pool: Vec<&CandidateArtifact> = if survivors.is_empty() {
        log::debug!(
            "All {} candidates look like libraries, falling back to the full set",
            candidates.len()
        );
        candidates.iter().collect()
    } else {
        survivors
    };

    let mut best = pool[0];
    for &candidate in &pool[1..] {
        if candidate.size > best.size {
            best = candidate;
        }
    }

    Ok(best)
}

/// Enumerates application archives below `root` in a stable order (sorted by file
/// name at every level).
pub fn collect_candidates(root: &Path) -> Vec<CandidateArtifact> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_application_archive(e.path()))
        .filter_map(|e| {
            let size = e.metadata().ok()?.len();
            let relative = e.path().strip_prefix(root).ok()?.to_path_buf();
            Some(CandidateArtifact {
                path: e.path().to_path_buf(),
                relative,
                size,
            })
        })
        .collect()
}
