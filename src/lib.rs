//! Filesystem event monitoring on Linux fanotify
//!
//! This crate wraps a fanotify notification group in a [`Listener`] that
//! reads kernel event records on a background thread and delivers decoded
//! [`Event`]s through a bounded queue. It also answers permission requests
//! for groups created with a permission class.
//!
//! # Features
//!
//! - **Kernel negotiation**: the richest report format the running kernel
//!   offers is chosen at construction, and marks needing a newer kernel are
//!   refused up front
//! - **Paths for every event**: file handles are resolved to open
//!   descriptors and paths, with entry names on kernel 5.9 and later
//! - **Whole-mount watching**: a listener watches individual paths or an
//!   entire mount, never both
//! - **Permission verdicts**: allow or deny open and access requests
//! - **Async support**: an optional tokio adapter (feature `tokio`)
//!
//! # Examples
//!
//! ## Basic usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::thread;
//!
//! use fanotify_listener::{EventMask, Listener, WatchTarget};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = Arc::new(Listener::new("/", 4096, true)?);
//!     listener.add_watch(&WatchTarget::directory("/tmp"), EventMask::FILE_CREATED)?;
//!
//!     let runner = Arc::clone(&listener);
//!     thread::spawn(move || runner.start());
//!
//!     for event in listener.events() {
//!         println!("{}: {}", event.mask, event.full_path().display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Async usage
//!
//! ```no_run
//! use futures::StreamExt;
//! use fanotify_listener::{AsyncListener, EventMask, Listener, WatchTarget};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = AsyncListener::new(Listener::new("/", 4096, false)?);
//!     listener.add_watch(&WatchTarget::path("/tmp/data.log"), EventMask::FILE_MODIFIED)?;
//!     let _running = listener.start();
//!
//!     let mut events = Box::pin(listener.into_stream());
//!     while let Some(event) = events.next().await {
//!         println!("Async event: {}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod decode;
pub mod error;
pub mod event;
pub mod flags;
pub mod linux;
pub mod listener;
pub mod privilege;
pub mod version;
pub mod watch;

#[cfg(feature = "tokio")]
pub mod async_listener;

pub use decode::{RecordDecoder, ReportTier};
pub use error::{FanotifyError, Result};
pub use event::Event;
pub use flags::{EventMask, InitFlags, MarkFlags, Verdict};
pub use listener::{Listener, ListenerConfig, PermissionClass, MIN_QUEUE_CAPACITY};
pub use privilege::{PrivilegeOracle, ProcStatusPrivilege};
pub use version::{Capability, KernelVersion, UnameVersion, VersionOracle};
pub use watch::{WatchMode, WatchRegistry, WatchTarget};

#[cfg(feature = "tokio")]
pub use async_listener::AsyncListener;
