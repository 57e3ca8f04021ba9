pub mod batch;
pub mod config;
pub mod decompiler;
pub mod descriptor;
pub mod error;
pub mod layers;
pub mod materializer;
pub mod metadata;
pub mod naming;
pub mod notifier;
pub mod plan;
pub mod selector;
pub mod session;
pub mod unpacker;

// Re-exports for easy access
pub use batch::{BatchResult, BatchRunner};
pub use config::{Config, Mode};
pub use decompiler::{CommandDecompiler, Decompiler};
pub use error::{ItemError, PreconditionError, UnpackError};
pub use materializer::{ProjectMaterializer, SourceProject};
pub use notifier::Notifier;
pub use session::LiveSessions;
pub use unpacker::{ArchiveUnpacker, TarTool};
