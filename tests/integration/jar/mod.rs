//! Application archive pipeline tests
//!
//! Each test lays out a `jars/` directory, runs one batch in jar mode and checks the
//! projects written under `projects/`.

use crate::integration::common::{self, PanickingDecompiler, StubDecompiler, Workspace};
use anyhow::Result;
use jar2source::{BatchRunner, Mode, Notifier, PreconditionError};
use std::fs;
use std::sync::atomic::Ordering;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_jar_with_decompiler() -> Result<()> {
        let ws = Workspace::new()?;
        common::write_demo_jar(&ws.jars().join("demo.jar"))?;

        let config = ws.config(Mode::Jar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier)
            .with_decompiler(Some(Box::new(StubDecompiler)))
            .run()?;

        assert_eq!(result.total, 1);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 0);

        let project = ws.projects().join("demo_source");
        assert_eq!(result.projects, vec![project.clone()]);

        let main = fs::read_to_string(project.join("src/main/java/com/acme/Main.java"))?;
        assert!(main.contains("decompiled Main"));
        assert!(project.join("src/main/java/com/acme/Util.java").is_file());
        assert!(
            !project.join("src/main/java/com/acme/Util$Inner.java").exists(),
            "Inner class is covered by its outer class source"
        );

        assert!(project.join("lib/helper-1.0.jar").is_file());
        assert_eq!(
            fs::read_to_string(project.join("pom.xml"))?,
            common::EMBEDDED_POM
        );
        assert_eq!(
            fs::read_to_string(project.join("src/main/resources/application.properties"))?,
            "server.port=8080\n"
        );
        assert!(project
            .join("src/main/resources/META-INF/MANIFEST.MF")
            .is_file());
        assert!(
            !project.join("src/main/resources/META-INF/maven").exists(),
            "Build provenance is not part of the resources"
        );

        assert!(ws.work_is_empty()?, "Extraction sessions must be cleaned up");
        Ok(())
    }

    #[test]
    fn test_without_decompiler_classes_are_copied() -> Result<()> {
        let ws = Workspace::new()?;
        common::write_demo_jar(&ws.jars().join("demo.jar"))?;

        let config = ws.config(Mode::Jar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier)
            .with_decompiler(None)
            .run()?;

        assert_eq!(result.succeeded, 1);
        let source_root = ws.projects().join("demo_source/src/main/java");
        assert_eq!(fs::read(source_root.join("com/acme/Main.class"))?, common::MAIN_CLASS);
        assert!(source_root.join("com/acme/Util$Inner.class").is_file());
        assert!(!source_root.join("com/acme/Main.java").exists());
        Ok(())
    }

    #[test]
    fn test_war_without_descriptor() -> Result<()> {
        let ws = Workspace::new()?;
        common::write_zip(
            &ws.jars().join("orders-2.1.war"),
            &[
                ("WEB-INF/web.xml", &b"<web-app/>"[..]),
                ("WEB-INF/classes/com/shop/OrderServlet.class", &b"\xCA\xFE\xBA\xBE"[..]),
                ("WEB-INF/classes/db.properties", &b"url=jdbc:h2:mem"[..]),
                ("WEB-INF/lib/commons-lang-2.6.jar", &b"PK"[..]),
                ("index.html", &b"<html/>"[..]),
            ],
        )?;

        let config = ws.config(Mode::Jar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier).run()?;
        assert_eq!(result.succeeded, 1);

        let project = ws.projects().join("orders-2.1_source");
        assert!(project
            .join("src/main/java/com/shop/OrderServlet.class")
            .is_file());
        assert!(project.join("src/main/resources/db.properties").is_file());
        assert!(project.join("src/main/webapp/WEB-INF/web.xml").is_file());
        assert!(project.join("src/main/webapp/index.html").is_file());
        assert!(project.join("lib/commons-lang-2.6.jar").is_file());

        let pom = fs::read_to_string(project.join("pom.xml"))?;
        assert!(pom.contains("<artifactId>orders</artifactId>"));
        assert!(pom.contains("<version>2.1</version>"));
        assert!(pom.contains("<packaging>war</packaging>"));
        Ok(())
    }

    #[test]
    fn test_failing_item_does_not_abort_batch() -> Result<()> {
        let ws = Workspace::new()?;
        fs::write(ws.jars().join("broken.jar"), b"this is not a zip archive")?;
        common::write_demo_jar(&ws.jars().join("demo.jar"))?;

        let config = ws.config(Mode::Jar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier).run()?;

        assert_eq!(result.total, 2);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].input, ws.jars().join("broken.jar"));
        assert!(result.failures[0].cause.contains("extraction failed"));
        assert!(ws.projects().join("demo_source/pom.xml").is_file());
        assert!(ws.work_is_empty()?);
        Ok(())
    }

    #[test]
    fn test_panicking_stage_is_isolated() -> Result<()> {
        let ws = Workspace::new()?;
        common::write_demo_jar(&ws.jars().join("demo.jar"))?;

        let config = ws.config(Mode::Jar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier)
            .with_decompiler(Some(Box::new(PanickingDecompiler)))
            .run()?;

        assert_eq!(result.failed, 1);
        assert!(result.failures[0].cause.contains("decompiler crashed"));
        assert!(ws.work_is_empty()?, "Session must be released on a fault");
        Ok(())
    }

    #[test]
    fn test_parallel_batch() -> Result<()> {
        let ws = Workspace::new()?;
        for name in ["a.jar", "b.jar", "c.war", "d.jar"] {
            common::write_demo_jar(&ws.jars().join(name))?;
        }

        let mut config = ws.config(Mode::Jar);
        config.jobs = 3;
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier)
            .with_decompiler(Some(Box::new(StubDecompiler)))
            .run()?;

        assert_eq!(result.succeeded, 4);
        for stem in ["a", "b", "c", "d"] {
            let project = ws.projects().join(format!("{}_source", stem));
            assert!(project.join("src/main/java/com/acme/Main.java").is_file());
        }
        assert!(ws.work_is_empty()?);
        Ok(())
    }

    #[test]
    fn test_rerun_replaces_project() -> Result<()> {
        let ws = Workspace::new()?;
        common::write_demo_jar(&ws.jars().join("demo.jar"))?;
        let stale = ws.projects().join("demo_source/src/main/java/Stale.java");
        fs::create_dir_all(stale.parent().unwrap())?;
        fs::write(&stale, "class Stale {}")?;

        let config = ws.config(Mode::Jar);
        let notifier = Notifier::silent();
        BatchRunner::new(&config, &notifier).run()?;

        assert!(!stale.exists());
        assert!(ws.projects().join("demo_source/pom.xml").is_file());
        Ok(())
    }

    #[test]
    fn test_cancelled_batch_starts_nothing() -> Result<()> {
        let ws = Workspace::new()?;
        common::write_demo_jar(&ws.jars().join("demo.jar"))?;

        let config = ws.config(Mode::Jar);
        let notifier = Notifier::silent();
        let runner = BatchRunner::new(&config, &notifier);
        runner.cancel_handle().store(true, Ordering::SeqCst);
        let result = runner.run()?;

        assert_eq!(result.total, 1);
        assert_eq!(result.cancelled, 1);
        assert_eq!(result.succeeded, 0);
        assert!(!ws.projects().join("demo_source").exists());
        Ok(())
    }

    #[test]
    fn test_zero_inputs_is_noop() -> Result<()> {
        let ws = Workspace::new()?;
        fs::write(ws.jars().join("README.txt"), "nothing to see")?;

        let config = ws.config(Mode::Jar);
        let notifier = Notifier::silent();
        let result = BatchRunner::new(&config, &notifier).run()?;

        assert_eq!(result.total, 0);
        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed, 0);
        assert!(!ws.projects().exists());
        Ok(())
    }

    #[test]
    fn test_missing_input_dir() -> Result<()> {
        let ws = Workspace::new()?;
        let mut config = ws.config(Mode::Jar);
        config.jars_dir = ws.root.path().join("does-not-exist");

        let notifier = Notifier::silent();
        let err = BatchRunner::new(&config, &notifier).run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PreconditionError>(),
            Some(PreconditionError::MissingInputDir(_))
        ));
        Ok(())
    }
}
