//! Logging setup and batch progress.
//!
//! One verbosity switch drives both `env_logger` (text logs) and `indicatif` (a batch
//! progress bar):
//! - [`VerbosityLevel::Quiet`] → only warnings are logged; a progress bar tracks items.
//! - [`VerbosityLevel::Info`]/[`VerbosityLevel::Debug`]/[`VerbosityLevel::Trace`] →
//!   standard logs, with textual progress lines instead of a bar.
//!
//! [`Notifier`] is shared by reference across worker threads, so all of its state is
//! behind a `Mutex`. Log records go through a [`LogWriter`] that hides the bar while
//! a record is printed.

use env_logger::{Env, Target};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerbosityLevel {
    Quiet = 0, // Progress bar, warnings only
    Info = 1,  // Text logs at info level
    Debug = 2, // Text logs at debug level
    Trace = 3, // Text logs at trace level
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    pub fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Installs the global logger, writing through `notifier`'s [`LogWriter`]. `RUST_LOG`
/// is still honored for per-module filters. Calling it twice is harmless.
pub fn init_logging(verbosity: VerbosityLevel, notifier: &Notifier) {
    let _ = env_logger::Builder::from_env(Env::default())
        .filter_level(verbosity.to_log_level())
        .format_timestamp(None)
        .target(Target::Pipe(Box::new(notifier.log_writer())))
        .try_init();
}

type BarSlot = Arc<Mutex<Option<ProgressBar>>>;

fn current_bar(slot: &BarSlot) -> Option<ProgressBar> {
    slot.lock().ok().and_then(|bar| bar.clone())
}

/// Stderr sink that suspends the active progress bar around every write.
pub struct LogWriter {
    bar: BarSlot,
    sink: Box<dyn Write + Send>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let sink = &mut self.sink;
        match current_bar(&self.bar) {
            Some(bar) => bar.suspend(|| sink.write(buf)),
            None => sink.write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let sink = &mut self.sink;
        match current_bar(&self.bar) {
            Some(bar) => bar.suspend(|| sink.write_all(buf)),
            None => sink.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

pub struct Notifier {
    verbosity: VerbosityLevel,
    bar: BarSlot,
}

impl Notifier {
    pub fn new(verbosity_level: u8) -> Self {
        Self {
            verbosity: VerbosityLevel::from(verbosity_level),
            bar: BarSlot::default(),
        }
    }

    /// A notifier that never draws anything, for library callers and tests.
    pub fn silent() -> Self {
        Self {
            verbosity: VerbosityLevel::Info,
            bar: BarSlot::default(),
        }
    }

    pub fn log_writer(&self) -> LogWriter {
        LogWriter {
            bar: Arc::clone(&self.bar),
            sink: Box::new(io::stderr()),
        }
    }

    pub fn verbosity_level(&self) -> VerbosityLevel {
        self.verbosity
    }

    pub fn use_progress_bar(&self) -> bool {
        self.verbosity == VerbosityLevel::Quiet
    }

    pub fn start_batch(&self, total: u64) {
        if !self.use_progress_bar() {
            log::info!("Processing {} inputs", total);
            return;
        }

        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len:4} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    // The slot is never locked while logging: the log writer locks it too.

    pub fn item_started(&self, name: &str) {
        match current_bar(&self.bar) {
            Some(bar) => bar.set_message(name.to_string()),
            None => log::info!("Processing {}", name),
        }
    }

    pub fn item_finished(&self, name: &str, succeeded: bool) {
        match current_bar(&self.bar) {
            Some(bar) => bar.inc(1),
            None => log::info!(
                "Finished {}: {}",
                name,
                if succeeded { "ok" } else { "failed" }
            ),
        }
    }

    /// Prints a line without tearing the progress bar.
    pub fn println(&self, message: &str) {
        match current_bar(&self.bar) {
            Some(bar) => bar.println(message),
            None => println!("{}", message),
        }
    }

    pub fn finish(&self) {
        let bar = self.bar.lock().ok().and_then(|mut slot| slot.take());
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    }
}
