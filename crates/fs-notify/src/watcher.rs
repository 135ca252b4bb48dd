use crate::{
	command::{Command, CommandQueue},
	driver::default_driver,
	Driver, Error, ErrorSink, EventSink, NullSink, Result,
};

use std::{
	collections::HashSet,
	fmt,
	path::{Component, Path, PathBuf},
	sync::Arc,
};

use async_channel as chan;
use parking_lot::Mutex;
use tokio::{spawn, sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchCommand {
	Add(PathBuf),
	Remove(PathBuf),
}

/// Sinks receiving what the driver produces while [`Watcher::watch`] runs.
#[derive(Clone)]
pub struct WatchOptions {
	pub event_sink: Arc<dyn EventSink>,
	pub error_sink: Arc<dyn ErrorSink>,
}

impl Default for WatchOptions {
	fn default() -> Self {
		Self {
			event_sink: Arc::new(NullSink),
			error_sink: Arc::new(NullSink),
		}
	}
}

impl WatchOptions {
	#[must_use]
	pub fn with_event_sink(mut self, sink: impl EventSink) -> Self {
		self.event_sink = Arc::new(sink);
		self
	}

	#[must_use]
	pub fn with_error_sink(mut self, sink: impl ErrorSink) -> Self {
		self.error_sink = Arc::new(sink);
		self
	}
}

impl fmt::Debug for WatchOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WatchOptions").finish_non_exhaustive()
	}
}

/// Keeps the set of paths the caller wants watched and feeds them to a [`Driver`].
///
/// Paths can be added or removed at any time, even before [`Watcher::watch`] is running; every
/// time `watch` starts, all known paths are registered again on the driver.
pub struct Watcher {
	driver: Arc<dyn Driver>,
	targets: Mutex<HashSet<PathBuf>>,
	pending: Arc<CommandQueue<WatchCommand>>,
}

impl fmt::Debug for Watcher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Watcher")
			.field("targets", &*self.targets.lock())
			.field("pending", &self.pending.len())
			.finish_non_exhaustive()
	}
}

impl Watcher {
	pub fn new(driver: Arc<dyn Driver>) -> Self {
		Self {
			driver,
			targets: Mutex::new(HashSet::new()),
			pending: Arc::new(CommandQueue::new()),
		}
	}

	/// A watcher backed by the driver for the current platform.
	#[must_use]
	pub fn new_default() -> Self {
		Self::new(default_driver())
	}

	#[must_use]
	pub fn driver(&self) -> &Arc<dyn Driver> {
		&self.driver
	}

	/// Paths currently requested, as they were given.
	#[must_use]
	pub fn targets(&self) -> Vec<PathBuf> {
		self.targets.lock().iter().cloned().collect()
	}

	/// Requests `path` to be watched, adding an already requested path is a no-op.
	pub fn add(&self, path: impl Into<PathBuf>) {
		let path = path.into();
		let inserted = self.targets.lock().insert(path.clone());
		if inserted {
			self.pending.append(Command::new(WatchCommand::Add(path)));
		}
	}

	/// Stops watching `path`, removing a path that was never added is a no-op.
	pub fn remove(&self, path: impl AsRef<Path>) {
		let path = path.as_ref();
		let removed = self.targets.lock().remove(path);
		if removed {
			self.pending
				.append(Command::new(WatchCommand::Remove(path.to_path_buf())));
		}
	}

	/// Runs the driver and serves add/remove requests until `stop` is cancelled.
	///
	/// Driver errors go to the error sink and never stop the watcher. Fails only when the driver
	/// gives up before becoming ready.
	#[instrument(skip_all)]
	pub async fn watch(&self, stop: CancellationToken, options: WatchOptions) -> Result<()> {
		let WatchOptions {
			event_sink,
			error_sink,
		} = options;

		// Everything spawned here dies with this call, even if the caller's token lives on
		let stop = stop.child_token();
		let stop_guard = stop.clone().drop_guard();

		let (control_tx, control_rx) = chan::bounded(1);
		let drain_handle = spawn({
			let pending = Arc::clone(&self.pending);
			let stop = stop.clone();

			async move {
				let chooser = move |_: &Command<WatchCommand>| Some(control_tx.clone());
				if let Err(e) = pending.drain(&stop, &chooser).await {
					error!(?e, "Watcher command queue stopped;");
				}
			}
		});

		let (ready_tx, ready_rx) = oneshot::channel();
		let driver_handle = spawn({
			let driver = Arc::clone(&self.driver);
			let stop = stop.clone();
			let error_sink = Arc::clone(&error_sink);

			async move { driver.run(stop, ready_tx, event_sink, error_sink).await }
		});

		let res = self
			.serve(&stop, ready_rx, control_rx, error_sink.as_ref())
			.await;

		drop(stop_guard);
		self.pending.clear();
		self.pending.wake();

		wait_task("command drain", drain_handle).await;
		wait_task("driver", driver_handle).await;

		res
	}

	async fn serve(
		&self,
		stop: &CancellationToken,
		ready_rx: oneshot::Receiver<()>,
		control_rx: chan::Receiver<Command<WatchCommand>>,
		error_sink: &dyn ErrorSink,
	) -> Result<()> {
		tokio::select! {
			() = stop.cancelled() => return Ok(()),
			res = ready_rx => {
				if res.is_err() {
					error_sink.error(Error::DriverNotReady);
					return Err(Error::DriverNotReady);
				}
			}
		}

		debug!("Driver ready, registering known targets");

		// The driver may be a fresh one, so it must learn about everything requested so far
		for path in self.targets() {
			self.pending.append(Command::new(WatchCommand::Add(path)));
		}
		self.pending.wake();

		// Targets this run has handed to the driver
		let mut registered = HashSet::new();

		loop {
			tokio::select! {
				() = stop.cancelled() => return Ok(()),
				res = control_rx.recv() => {
					let Ok(command) = res else {
						warn!("Control channel closed, stop serving commands");
						return Ok(());
					};

					if let Err(e) = self.handle_control_command(stop, command, &mut registered).await {
						error_sink.error(e);
					}
				}
			}
		}
	}

	/// Applies a queued command unless the target set has moved on since it was queued.
	///
	/// Commands are queued after the target set lock is released, so concurrent changes to one
	/// path can reach the queue out of order. The set is the source of truth.
	async fn handle_control_command(
		&self,
		stop: &CancellationToken,
		command: Command<WatchCommand>,
		registered: &mut HashSet<PathBuf>,
	) -> Result<()> {
		// Watcher commands are never acknowledged
		let (kind, _) = command.into_parts();

		match kind {
			WatchCommand::Add(path) => {
				let wanted = self.targets.lock().contains(&path);
				if !wanted || registered.contains(&path) {
					trace!(?path, "Skipping stale add");
					return Ok(());
				}

				let cleaned = clean_path(&path);
				trace!(path = ?cleaned, "Adding watch target");
				self.driver.add(stop, &cleaned).await?;
				registered.insert(path);
			}
			WatchCommand::Remove(path) => {
				let wanted = self.targets.lock().contains(&path);
				if wanted || !registered.contains(&path) {
					trace!(?path, "Skipping stale remove");
					return Ok(());
				}

				registered.remove(&path);
				let cleaned = clean_path(&path);
				trace!(path = ?cleaned, "Removing watch target");
				self.driver.remove(stop, &cleaned).await?;
			}
		}

		Ok(())
	}
}

async fn wait_task(name: &str, handle: JoinHandle<()>) {
	if let Err(e) = handle.await {
		if e.is_panic() {
			error!(?e, task = name, "Watcher task panicked;");
		}
	}
}

/// Lexically normalizes a path, without touching the filesystem.
///
/// Repeated separators and `.` segments are removed, `..` segments consume the previous segment
/// when there is one (and are dropped at the root of absolute paths). An empty result is `.`.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
	let mut parts = Vec::new();
	let mut rooted = false;

	for component in path.components() {
		match component {
			Component::Prefix(_) | Component::RootDir => {
				rooted = true;
				parts.push(component);
			}
			Component::CurDir => {}
			Component::ParentDir => {
				if matches!(parts.last(), Some(Component::Normal(_))) {
					parts.pop();
				} else if !rooted {
					parts.push(component);
				}
			}
			Component::Normal(_) => parts.push(component),
		}
	}

	if parts.is_empty() {
		return PathBuf::from(".");
	}

	parts.iter().collect()
}
