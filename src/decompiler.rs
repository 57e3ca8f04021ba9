//! External decompiler contract.
//!
//! A decompiler takes one class file and returns Java source text. The only shipped
//! implementation, [`CommandDecompiler`], runs a configured command line (for example
//! `java -jar cfr.jar`) with the class file appended as the last argument and reads
//! the source from stdout. Arguments are passed as a vector, never through a shell.

use anyhow::{anyhow, bail, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub trait Decompiler: Send + Sync {
    /// Returns the name of the decompiler for log messages
    fn name(&self) -> &str;

    /// Decompiles a single class file into source text
    fn decompile(&self, class_file: &Path) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct CommandDecompiler {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDecompiler {
    /// Resolves `command` (program followed by its arguments) and checks that every
    /// `.jar` argument exists. Fails when the tool cannot possibly run.
    pub fn probe(command: &[String], timeout: Duration) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("decompiler command is empty"))?;

        let program_path = Path::new(program);
        let resolved = if program_path.components().count() > 1 {
            if !program_path.is_file() {
                bail!("decompiler program not found: {}", program);
            }
            program_path.to_path_buf()
        } else {
            which::which(program)
                .with_context(|| format!("decompiler program '{}' is not on PATH", program))?
        };

        for arg in args {
            if arg.ends_with(".jar") && !Path::new(arg).is_file() {
                bail!("decompiler archive not found: {}", arg);
            }
        }

        let name = args
            .iter()
            .find(|a| a.ends_with(".jar"))
            .map(|a| crate::naming::file_stem_or(Path::new(a), a).to_string())
            .unwrap_or_else(|| program.clone());

        Ok(Self {
            name,
            program: resolved,
            args: args.to_vec(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

impl Decompiler for CommandDecompiler {
    fn name(&self) -> &str {
        &self.name
    }

    fn decompile(&self, class_file: &Path) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(class_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("decompiler stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("decompiler stderr not captured"))?;
        let stdout_reader = spawn_reader(stdout);
        let stderr_reader = spawn_reader(stderr);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                child.kill().ok();
                child.wait().ok();
                bail!(
                    "{} timed out after {}s on {}",
                    self.name,
                    self.timeout.as_secs(),
                    class_file.display()
                );
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = stdout_reader
            .join()
            .map_err(|_| anyhow!("decompiler stdout reader panicked"))??;
        let errors = stderr_reader
            .join()
            .map_err(|_| anyhow!("decompiler stderr reader panicked"))??;

        if !status.success() {
            bail!(
                "{} exited with {}: {}",
                self.name,
                status,
                String::from_utf8_lossy(&errors).trim()
            );
        }
        if output.iter().all(|b| b.is_ascii_whitespace()) {
            bail!("{} produced no output for {}", self.name, class_file.display());
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}
