//! Maven descriptor for projects whose archive carried none.

const GROUP_ID: &str = "recovered";
const DEFAULT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    pub artifact_id: String,
    pub version: String,
}

impl ProjectIdentity {
    /// `demo-1.2.3.jar` → `demo` / `1.2.3`; `demo.jar` → `demo` / `1.0.0`.
    pub fn from_archive_name(archive_name: &str) -> Self {
        let stem = match archive_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => archive_name,
        };

        let split = stem
            .match_indices('-')
            .map(|(i, _)| i)
            .find(|&i| {
                stem[i + 1..]
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false)
            })
            .filter(|&i| i > 0);

        let (artifact, version) = match split {
            Some(i) => (&stem[..i], &stem[i + 1..]),
            None => (stem, DEFAULT_VERSION),
        };

        let artifact_id = crate::metadata::sanitize(artifact);
        Self {
            artifact_id: if artifact_id.is_empty() {
                "recovered-project".to_string()
            } else {
                artifact_id
            },
            version: crate::metadata::sanitize(version),
        }
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Minimal `pom.xml`: identity, compiler level, an empty dependency block.
pub fn synthesize_pom(archive_name: &str, java_release: &str) -> String {
    let identity = ProjectIdentity::from_archive_name(archive_name);
    let java_release = escape_xml(java_release);
    let packaging = if archive_name.to_ascii_lowercase().ends_with(".war") {
        "war"
    } else {
        "jar"
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="http://maven.apache.org/POM/4.0.0 http://maven.apache.org/xsd/maven-4.0.0.xsd">
    <modelVersion>4.0.0</modelVersion>

    <groupId>{group}</groupId>
    <artifactId>{artifact}</artifactId>
    <version>{version}</version>
    <packaging>{packaging}</packaging>

    <properties>
        <maven.compiler.source>{release}</maven.compiler.source>
        <maven.compiler.target>{release}</maven.compiler.target>
        <project.build.sourceEncoding>UTF-8</project.build.sourceEncoding>
    </properties>

    <dependencies>
    </dependencies>
</project>
"#,
        group = GROUP_ID,
        artifact = identity.artifact_id,
        version = identity.version,
        packaging = packaging,
        release = java_release,
    )
}
