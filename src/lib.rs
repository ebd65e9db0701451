//! # dkr-reload: USB upload and hot reload for DKR development consoles
//!
//! Drives an external USB loader (UNFLoader) to upload a ROM image to a
//! development console, interprets the loader's line protocol, and pushes a
//! freshly built code artifact to the running game whenever it changes on disk.
//!
//! ## Architecture
//!
//! - **Backend**: A single control loop owns the session. The loader runs in a
//!   pseudo-terminal; its output is read on a helper thread and funnelled into
//!   the loop together with shell commands, watcher ticks and reconnect timers.
//! - **Shell**: Anything that renders status and output and forwards user input.
//!   The bundled binary is a small terminal shell.
//! - **Communication**: Crossbeam channels carry [`backend::BackendCommand`]s in
//!   and [`backend::BackendMessage`]s out.
//!
//! ## Configuration
//!
//! Settings are read from `dkr-reload.toml` in the working directory or from
//! the platform config directory under `dkr-reload/config.toml`:
//!
//! - **Linux**: `~/.config/dkr-reload/config.toml`
//! - **macOS**: `~/Library/Application Support/dkr-reload/config.toml`
//! - **Windows**: `%APPDATA%\dkr-reload\config.toml`
//!
//! ## Example
//!
//! ```ignore
//! use dkr_reload::{AppConfig, BackendMessage, ReloadBackend};
//!
//! fn main() -> dkr_reload::Result<()> {
//!     let config = AppConfig::discover(None)?;
//!     let (backend, frontend) = ReloadBackend::new(config)?;
//!
//!     let handle = std::thread::spawn(move || backend.run());
//!     frontend.select_image("/home/dev/dkr/build/dkr.z64");
//!
//!     while let Ok(msg) = frontend.receiver.recv() {
//!         match msg {
//!             BackendMessage::Status { text, severity } => println!("[{}] {}", severity, text),
//!             BackendMessage::Shutdown => break,
//!             _ => {}
//!         }
//!     }
//!
//!     let _ = handle.join();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use backend::{BackendCommand, BackendMessage, FrontendReceiver, ReloadBackend};
pub use config::AppConfig;
pub use error::{ReloadError, Result};
pub use session::Session;
pub use types::{ConnectionState, Severity};
