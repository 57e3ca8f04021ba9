//! Container export pipeline tests
//!
//! Exports are assembled in memory in both layouts the layer walker understands:
//! OCI image layouts (`index.json` + `blobs/sha256/`) and Docker `save` output
//! (`manifest.json` + `<id>/layer.tar`).

use crate::integration::common::{self, Workspace};
use anyhow::Result;
use jar2source::{BatchRunner, Mode, Notifier};
use std::fs;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

fn digest(c: char) -> String {
    std::iter::repeat(c).take(64).collect()
}

fn oci_index(reference: &str) -> String {
    format!(
        r#"{{
  "schemaVersion": 2,
  "mediaType": "application/vnd.oci.image.index.v1+json",
  "manifests": [
    {{
      "mediaType": "application/vnd.oci.image.manifest.v1+json",
      "digest": "sha256:{}",
      "size": 1024,
      "annotations": {{ "io.containerd.image.name": "{}" }}
    }}
  ]
}}"#,
        digest('c'),
        reference
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oci_export_selects_application_archive() -> Result<()> {
        let ws = Workspace::new()?;

        let app_jar = common::padded_jar_bytes("com/acme/App.class", 2 * MIB)?;
        let spring_jar = common::padded_jar_bytes("org/springframework/Core.class", MIB)?;
        let layer = common::tar_bytes(&[
            ("app/app.jar", app_jar.as_slice()),
            ("app/spring-core-5.3.jar", spring_jar.as_slice()),
        ])?;
        let config_blob = vec![b'x'; 500 * KIB];

        let small_blob = format!("blobs/sha256/{}", digest('a'));
        let layer_blob = format!("blobs/sha256/{}", digest('b'));
        let index = oci_index("docker.io/acme/shop:2.0");
        common::write_tar(
            &ws.tars().join("shop-export.tar"),
            &[
                ("oci-layout", &br#"{"imageLayoutVersion":"1.0.0"}"#[..]),
                ("index.json", index.as_bytes()),
                (small_blob.as_str(), config_blob.as_slice()),
                (layer_blob.as_str(), layer.as_slice()),
            ],
        )?;

        let config = ws.config(Mode::Tar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier).run()?;

        assert_eq!(result.total, 1);
        assert_eq!(result.succeeded, 1, "failures: {:?}", result.failures);

        let exported = ws.jars().join("shop-2.0.jar");
        assert_eq!(fs::read(&exported)?, app_jar, "The largest application jar wins");

        let project = ws.projects().join("shop-export_source");
        assert!(project.join("src/main/java/com/acme/App.class").is_file());
        assert!(!project.join("src/main/java/org").exists());
        assert_eq!(fs::read(project.join("lib/spring-core-5.3.jar"))?, spring_jar);
        assert!(!project.join("lib/app.jar").exists());
        assert!(project.join("pom.xml").is_file());
        assert!(ws.work_is_empty()?);
        Ok(())
    }

    #[test]
    fn test_image_archives_become_project_dependencies() -> Result<()> {
        let ws = Workspace::new()?;

        let app_jar = common::padded_jar_bytes("com/acme/App.class", 20 * KIB)?;
        let helper_jar = common::zip_bytes(&[("com/acme/util/Helper.class", &b"\xCA\xFE"[..])])?;
        let layer = common::tar_bytes(&[
            ("app/app.jar", app_jar.as_slice()),
            ("app/lib/helper-1.0.jar", helper_jar.as_slice()),
        ])?;
        common::write_tar(
            &ws.tars().join("svc.tar"),
            &[
                (
                    "manifest.json",
                    &br#"[{"Config":"cfg.json","RepoTags":["acme/svc:1.4"],"Layers":["abc/layer.tar"]}]"#[..],
                ),
                ("abc/layer.tar", layer.as_slice()),
            ],
        )?;

        let config = ws.config(Mode::Tar);
        let notifier = Notifier::silent();
        let runner = BatchRunner::new(&config, &notifier);
        let result = runner.run()?;

        assert_eq!(result.succeeded, 1, "failures: {:?}", result.failures);
        assert_eq!(fs::read(ws.jars().join("svc-1.4.jar"))?, app_jar);

        let project = ws.projects().join("svc_source");
        assert_eq!(fs::read(project.join("lib/helper-1.0.jar"))?, helper_jar);
        assert!(project.join("src/main/java/com/acme/App.class").is_file());
        assert!(runner.live_sessions().is_empty());
        assert!(ws.work_is_empty()?);
        Ok(())
    }

    #[test]
    fn test_deleted_archive_in_upper_layer_is_not_selected() -> Result<()> {
        let ws = Workspace::new()?;

        let stale_jar = common::padded_jar_bytes("com/acme/Legacy.class", 80 * KIB)?;
        let app_jar = common::padded_jar_bytes("com/acme/App.class", 20 * KIB)?;
        let base = common::tar_bytes(&[("opt/legacy.jar", stale_jar.as_slice())])?;
        let top = common::tar_bytes(&[
            ("opt/.wh.legacy.jar", &b""[..]),
            ("opt/app.jar", app_jar.as_slice()),
        ])?;
        common::write_tar(
            &ws.tars().join("upgraded.tar"),
            &[
                (
                    "manifest.json",
                    &br#"[{"Config":"cfg.json","RepoTags":null,"Layers":["l1/layer.tar","l2/layer.tar"]}]"#[..],
                ),
                ("l1/layer.tar", base.as_slice()),
                ("l2/layer.tar", top.as_slice()),
            ],
        )?;

        let config = ws.config(Mode::Tar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier).run()?;

        assert_eq!(result.succeeded, 1, "failures: {:?}", result.failures);
        assert_eq!(fs::read(ws.jars().join("upgraded.jar"))?, app_jar);
        assert!(!ws
            .projects()
            .join("upgraded_source/lib/legacy.jar")
            .exists());
        Ok(())
    }

    #[test]
    fn test_docker_export_without_tag_uses_export_name() -> Result<()> {
        let ws = Workspace::new()?;

        let billing_jar = common::padded_jar_bytes("Billing.class", 10 * KIB)?;
        let guava_jar = common::padded_jar_bytes("com/google/Lists.class", 50 * KIB)?;
        let layer = common::gzip_bytes(&common::tar_bytes(&[
            ("opt/app/billing.jar", billing_jar.as_slice()),
            ("opt/app/lib/guava-30.jar", guava_jar.as_slice()),
        ])?)?;

        common::write_tar(
            &ws.tars().join("legacy-billing.tar"),
            &[
                (
                    "manifest.json",
                    &br#"[{"Config":"cfg.json","RepoTags":null,"Layers":["abc/layer.tar"]}]"#[..],
                ),
                ("abc/layer.tar", layer.as_slice()),
            ],
        )?;

        let config = ws.config(Mode::Tar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier).run()?;

        assert_eq!(result.succeeded, 1, "failures: {:?}", result.failures);
        assert_eq!(
            fs::read(ws.jars().join("legacy-billing.jar"))?,
            billing_jar,
            "Archives below lib/ are never the main application"
        );
        assert!(ws
            .projects()
            .join("legacy-billing_source/src/main/java/Billing.class")
            .is_file());
        Ok(())
    }

    #[test]
    fn test_flat_export_is_searched_directly() -> Result<()> {
        let ws = Workspace::new()?;
        common::write_tar(
            &ws.tars().join("flat.tar"),
            &[("deploy/service.jar", common::demo_jar_bytes()?.as_slice())],
        )?;

        let config = ws.config(Mode::Tar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier).run()?;

        assert_eq!(result.succeeded, 1, "failures: {:?}", result.failures);
        assert!(ws.jars().join("flat.jar").is_file());
        assert_eq!(
            fs::read_to_string(ws.projects().join("flat_source/pom.xml"))?,
            common::EMBEDDED_POM
        );
        Ok(())
    }

    #[test]
    fn test_export_without_application_archive() -> Result<()> {
        let ws = Workspace::new()?;
        let layer = common::tar_bytes(&[("etc/hosts", &b"127.0.0.1 localhost\n"[..])])?;
        common::write_tar(
            &ws.tars().join("base.tar"),
            &[("abc/layer.tar", layer.as_slice())],
        )?;
        common::write_tar(
            &ws.tars().join("other.tar"),
            &[("deploy/service.jar", common::demo_jar_bytes()?.as_slice())],
        )?;

        let config = ws.config(Mode::Tar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier).run()?;

        assert_eq!(result.total, 2);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].input, ws.tars().join("base.tar"));
        assert!(result.failures[0]
            .cause
            .contains("no application archive found"));
        assert!(!ws.projects().join("base_source").exists());
        assert!(ws.work_is_empty()?);
        Ok(())
    }

    #[test]
    fn test_corrupt_export_is_an_item_failure() -> Result<()> {
        let ws = Workspace::new()?;
        fs::write(ws.tars().join("truncated.tar"), vec![0x42u8; 700])?;

        let config = ws.config(Mode::Tar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier).run()?;

        assert_eq!(result.failed, 1);
        assert!(ws.work_is_empty()?);
        Ok(())
    }
}
