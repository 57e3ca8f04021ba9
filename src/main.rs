use anyhow::Result;
use clap::Parser;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use jar2source::notifier::{init_logging, VerbosityLevel};
use jar2source::{BatchRunner, Config, LiveSessions, Mode, Notifier, PreconditionError, TarTool};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        value_enum,
        help = "Input kind: application archives or container image exports [default: jar]"
    )]
    mode: Option<Mode>,

    #[arg(short, long, help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Directory of application archives (also receives exported archives)")]
    jars_dir: Option<PathBuf>,

    #[arg(long, help = "Directory of container image exports")]
    tars_dir: Option<PathBuf>,

    #[arg(short, long, help = "Output directory for reconstructed projects")]
    projects_dir: Option<PathBuf>,

    #[arg(long, help = "Suffix appended to each project directory name")]
    suffix: Option<String>,

    #[arg(long, help = "Parent directory for per-item working directories")]
    work_dir: Option<PathBuf>,

    #[arg(short, long, help = "Number of inputs processed in parallel")]
    jobs: Option<usize>,

    #[arg(long, help = "OCI blobs smaller than this many bytes are not unpacked")]
    min_blob_size: Option<u64>,

    #[arg(long, value_enum, help = "Tar implementation used for container exports")]
    tar_tool: Option<TarTool>,

    #[arg(
        long,
        num_args = 1..,
        allow_hyphen_values = true,
        help = "Decompiler command; the class file path is appended (e.g. java -jar cfr.jar)"
    )]
    decompiler: Option<Vec<String>>,

    #[arg(long, help = "Copy class files instead of decompiling them")]
    no_decompile: bool,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace). Also switches to text-based progress"
    )]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(dir) = self.jars_dir {
            config.jars_dir = dir;
        }
        if let Some(dir) = self.tars_dir {
            config.tars_dir = dir;
        }
        if let Some(dir) = self.projects_dir {
            config.projects_dir = dir;
        }
        if let Some(suffix) = self.suffix {
            config.project_suffix = suffix;
        }
        if let Some(dir) = self.work_dir {
            config.work_dir = Some(dir);
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(size) = self.min_blob_size {
            config.min_blob_size = size;
        }
        if let Some(tool) = self.tar_tool {
            config.tar_tool = tool;
        }
        if let Some(command) = self.decompiler {
            config.decompiler.command = command;
        }
        if self.no_decompile {
            config.decompiler.enabled = false;
        }
        Ok(config)
    }
}

/// First Ctrl+C lets running items finish (and clean up) but starts no new ones.
/// A second one removes the session directories still in use and exits.
fn install_interrupt_handler(cancel: Arc<AtomicBool>, sessions: LiveSessions) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Unable to listen for Ctrl+C: {}", e);
                return;
            }
        };

        runtime.block_on(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for Ctrl+C: {}", e);
                return;
            }
            warn!("Interrupted, finishing running items (Ctrl+C again to abort)");
            cancel.store(true, Ordering::SeqCst);

            if tokio::signal::ctrl_c().await.is_ok() {
                let removed = sessions.remove_all();
                warn!("Aborted, removed {} session directories", removed);
                std::process::exit(130);
            }
        });
    });
}

fn run(cli: Cli, notifier: &Notifier) -> Result<ExitCode> {
    let config = cli.into_config()?;

    info!("Starting jar2source in {:?} mode", config.mode);
    debug!("Input directory: {}", config.input_dir().display());
    debug!("Projects directory: {}", config.projects_dir.display());
    debug!("Jobs: {}", config.jobs);

    let runner = BatchRunner::new(&config, notifier);
    install_interrupt_handler(runner.cancel_handle(), runner.live_sessions());
    match runner.run() {
        Ok(result) => {
            notifier.println(&result.to_string());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.downcast_ref::<PreconditionError>().is_some() => {
            error!("{}", e);
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e),
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let notifier = Notifier::new(cli.verbose);
    init_logging(VerbosityLevel::from(cli.verbose), &notifier);
    run(cli, &notifier)
}
