use crate::metadata::{self, ImageTag};
use std::path::Path;

/// Base file name without its last extension, falling back to `fallback` for
/// paths without a usable name.
pub fn file_stem_or<'a>(path: &'a Path, fallback: &'a str) -> &'a str {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
}

/// Directory name of the source project recovered from `input`.
pub fn project_dir_name(input: &Path, suffix: &str) -> String {
    format!("{}{}", file_stem_or(input, "project"), suffix)
}

/// File name for the application archive pulled out of a container export:
/// `<image>-<tag>.<ext>` when the export names its image, else the export's own stem.
pub fn exported_archive_name(export: &Path, tag: Option<&ImageTag>, extension: &str) -> String {
    match tag {
        Some(tag) => tag.archive_name(extension),
        None => {
            let stem = metadata::sanitize(file_stem_or(export, "image"));
            let stem = if stem.is_empty() { "image".to_string() } else { stem };
            format!("{}.{}", stem, extension)
        }
    }
}
