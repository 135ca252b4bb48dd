//!
//! # File System Notifications
//!
//! Watches a set of paths and reports what happens to them as a stream of [`Event`]s, each one
//! carrying the affected path and an [`OpMask`] with the operations seen.
//!
//! The [`Watcher`] only keeps track of what the user asked for; the kernel side lives in a
//! [`Driver`]. Linux and Android get an inotify driver, other platforms fall back to a
//! [`NullDriver`] that never reports anything.
//!
//! - Paths can be added and removed at any time, even while the watcher isn't running;
//! - Every time the watcher starts, all known paths are registered again on the driver;
//! - Errors never stop the watcher, they are handed to an [`ErrorSink`];
//!
//! ## Basic example
//!
//! ```no_run
//! use sd_fs_notify::{ChannelEventSink, Watcher, WatchOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), sd_fs_notify::Error> {
//! let watcher = Watcher::new_default();
//! watcher.add("/tmp");
//!
//! let (events_tx, events_rx) = async_channel::unbounded();
//! let stop = CancellationToken::new();
//!
//! tokio::spawn(async move {
//! 	while let Ok(event) = events_rx.recv().await {
//! 		println!("{event}");
//! 	}
//! });
//!
//! watcher
//! 	.watch(
//! 		stop,
//! 		WatchOptions::default().with_event_sink(ChannelEventSink(events_tx)),
//! 	)
//! 	.await
//! # }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod command;
mod config;
mod driver;
mod error;
mod event;
mod sink;
mod watcher;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod inotify;

pub use command::{Command, CommandQueue, EgressChooser, Reply, SendOptions, DRAIN_BATCH_SIZE};
pub use config::Config;
pub use driver::{default_driver, Driver, NullDriver};
pub use error::{Error, Result};
pub use event::{Event, Op, OpMask};
pub use sink::{ChannelErrorSink, ChannelEventSink, ErrorSink, EventSink, NullSink};
pub use watcher::{clean_path, WatchOptions, Watcher};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use inotify::InotifyDriver;
