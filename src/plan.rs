//! Role of each file in an unpacked application archive.
//!
//! [`classify`] is a pure function of the archive-relative path; every stage calls it
//! again instead of caching, so results never go stale between extraction rounds.

use std::path::{Component, Path, PathBuf};

pub const METADATA_DIR: &str = "META-INF";
pub const PROVENANCE_DIR: &str = "META-INF/maven";
pub const CLASS_EXTENSION: &str = "class";
pub const SOURCE_EXTENSION: &str = "java";

/// Directory prefixes that hold the class path root inside fat jars and wars.
const CLASS_ROOTS: &[&str] = &["BOOT-INF/classes", "WEB-INF/classes"];
const WEB_INF: &str = "WEB-INF";

const CONFIG_EXTENSIONS: &[&str] = &[
    "properties",
    "yml",
    "yaml",
    "xml",
    "json",
    "conf",
    "cfg",
    "ini",
    "txt",
    "sql",
    "ftl",
    "vm",
    "sh",
    "dtd",
    "xsd",
    "tld",
    "factories",
    "imports",
    "handlers",
    "schemas",
];

const WEB_EXTENSIONS: &[&str] = &[
    "html", "htm", "jsp", "jspf", "css", "js", "map", "png", "jpg", "jpeg", "gif", "svg", "ico",
    "woff", "woff2", "ttf", "eot",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Configuration, manifests and structured data (`src/main/resources`)
    Config,
    /// Web content (`src/main/webapp`)
    Web,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRole {
    ClassFile {
        /// Source path relative to the source root, e.g. `com/acme/Foo.java`
        source: PathBuf,
        inner: bool,
    },
    DependencyArchive,
    Metadata,
    Provenance,
    Resource {
        kind: ResourceKind,
        relative: PathBuf,
    },
    Ignored,
}

fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn starts_with_dir(relative: &Path, dir: &str) -> bool {
    relative.starts_with(dir) && relative != Path::new(dir)
}

/// Strips a fat-jar or war class root, leaving the package-relative path.
pub fn package_relative(relative: &Path) -> &Path {
    for root in CLASS_ROOTS {
        if let Ok(stripped) = relative.strip_prefix(root) {
            return stripped;
        }
    }
    relative
}

/// `com/acme/Foo$Bar.class` → `com/acme/Foo.java`, the file the outer class decompiles to.
pub fn outer_source_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let outer = stem.split('$').next().unwrap_or(stem);
    source.with_file_name(format!("{}.{}", outer, SOURCE_EXTENSION))
}

fn is_plain(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

pub fn classify(relative: &Path) -> FileRole {
    if relative.as_os_str().is_empty() || !is_plain(relative) {
        return FileRole::Ignored;
    }

    let extension = extension_lower(relative);
    let in_metadata = starts_with_dir(relative, METADATA_DIR);

    match extension.as_deref() {
        Some(CLASS_EXTENSION) => {
            if in_metadata {
                return FileRole::Ignored;
            }
            let package_path = package_relative(relative);
            let inner = package_path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.contains('$'))
                .unwrap_or(false);
            FileRole::ClassFile {
                source: package_path.with_extension(SOURCE_EXTENSION),
                inner,
            }
        }
        Some("jar") | Some("war") => FileRole::DependencyArchive,
        _ if starts_with_dir(relative, PROVENANCE_DIR) => FileRole::Provenance,
        _ if in_metadata => FileRole::Metadata,
        _ => classify_resource(relative, extension.as_deref()),
    }
}

fn classify_resource(relative: &Path, extension: Option<&str>) -> FileRole {
    let package_path = package_relative(relative);
    let under_web_inf = package_path == relative && starts_with_dir(relative, WEB_INF);

    if under_web_inf {
        return FileRole::Resource {
            kind: ResourceKind::Web,
            relative: relative.to_path_buf(),
        };
    }

    match extension {
        Some(ext) if CONFIG_EXTENSIONS.contains(&ext) => FileRole::Resource {
            kind: ResourceKind::Config,
            relative: package_path.to_path_buf(),
        },
        Some(ext) if WEB_EXTENSIONS.contains(&ext) => FileRole::Resource {
            kind: ResourceKind::Web,
            relative: package_path.to_path_buf(),
        },
        _ => FileRole::Ignored,
    }
}
