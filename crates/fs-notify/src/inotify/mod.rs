//! Linux backend on top of inotify(7).
//!
//! A blocking thread waits on the inotify fd with `epoll`, decodes the records and hands them to
//! the event sink. Watches are changed by a single async task, which receives `add`/`remove`
//! requests through a [`CommandQueue`] so callers never touch the kernel state directly.

use crate::{
	command::{Command, CommandQueue, SendOptions},
	Config, Driver, Error, ErrorSink, EventSink, Result,
};

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use async_channel as chan;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{spawn, sync::oneshot, task::spawn_blocking};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

mod poll;
mod record;
mod registry;
mod sys;

use poll::Poller;
use registry::WatchRegistry;
use sys::{EventReader, Inotify, WatchId, WatchMask, AGNOSTIC_EVENTS};

#[derive(Debug, Clone, PartialEq, Eq)]
enum DriverCommand {
	Add(PathBuf),
	Remove(PathBuf),
}

/// [`Driver`] backed by inotify.
///
/// A single instance may be run several times, one run at a time; watches never outlive the run
/// that created them.
#[derive(Debug)]
pub struct InotifyDriver {
	config: Config,
	pending: Arc<CommandQueue<DriverCommand>>,
}

impl Default for InotifyDriver {
	fn default() -> Self {
		Self::with_config(Config::default())
	}
}

impl InotifyDriver {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_config(config: Config) -> Self {
		Self {
			config,
			pending: Arc::new(CommandQueue::new()),
		}
	}

	#[must_use]
	pub const fn config(&self) -> &Config {
		&self.config
	}

	async fn send(&self, stop: &CancellationToken, command: DriverCommand) -> Result<()> {
		let options = SendOptions {
			acknowledge: self.config.acknowledge,
		};

		tokio::select! {
			biased;

			res = self.pending.send_command(command, options) => res,
			() = stop.cancelled() => Err(Error::Cancelled),
		}
	}
}

#[async_trait]
impl Driver for InotifyDriver {
	#[instrument(skip_all, fields(path = %path.display()))]
	async fn add(&self, stop: &CancellationToken, path: &Path) -> Result<()> {
		self.send(stop, DriverCommand::Add(path.to_path_buf())).await
	}

	#[instrument(skip_all, fields(path = %path.display()))]
	async fn remove(&self, stop: &CancellationToken, path: &Path) -> Result<()> {
		self.send(stop, DriverCommand::Remove(path.to_path_buf()))
			.await
	}

	#[instrument(skip_all)]
	async fn run(
		&self,
		stop: CancellationToken,
		ready: oneshot::Sender<()>,
		events: Arc<dyn EventSink>,
		errors: Arc<dyn ErrorSink>,
	) {
		let (inotify, reader) = match Inotify::init()
			.and_then(|inotify| EventReader::new(&inotify).map(|reader| (inotify, reader)))
		{
			Ok(pair) => pair,
			Err(e) => {
				error!(?e, "Failed to initialize inotify;");
				errors.error(Error::InotifyInit(e));
				return;
			}
		};

		let registry = Arc::new(Mutex::new(WatchRegistry::default()));

		let (poller, waker) = match Poller::new(
			&self.config,
			reader,
			Arc::clone(&registry),
			events,
			Arc::clone(&errors),
		) {
			Ok(pair) => pair,
			Err(e) => {
				error!(?e, "Failed to set up inotify poller;");
				errors.error(e);
				return;
			}
		};

		let stop = stop.child_token();
		let stop_guard = stop.clone().drop_guard();

		let (control_tx, control_rx) = chan::bounded(1);
		let drain_handle = spawn({
			let pending = Arc::clone(&self.pending);
			let stop = stop.clone();

			async move {
				let chooser = move |command: &Command<DriverCommand>| match command.kind() {
					DriverCommand::Add(_) | DriverCommand::Remove(_) => Some(control_tx.clone()),
				};

				if let Err(e) = pending.drain(&stop, &chooser).await {
					error!(?e, "Inotify command queue stopped;");
				}
			}
		});

		let poll_handle = spawn_blocking({
			let stop = stop.clone();
			move || poller.run(&stop)
		});

		if ready.send(()).is_err() {
			debug!("Nobody is waiting for the inotify driver to get ready");
		}

		let control = Control {
			inotify: &inotify,
			registry: &registry,
			errors: errors.as_ref(),
		};

		loop {
			tokio::select! {
				() = stop.cancelled() => break,
				res = control_rx.recv() => {
					let Ok(command) = res else {
						warn!("Inotify control channel closed;");
						break;
					};

					control.handle(command);
				}
			}
		}

		drop(stop_guard);

		// The poller only notices cancellation once it wakes up
		if let Err(e) = waker.wake() {
			error!(?e, "Failed to wake up the inotify poller;");
		}

		self.pending.clear();
		self.pending.wake();

		if let Err(e) = poll_handle.await {
			error!(?e, "Inotify poller task failed;");
		}
		if let Err(e) = drain_handle.await {
			error!(?e, "Inotify command drain task failed;");
		}

		debug!(watches = registry.lock().len(), "Inotify driver stopped");
	}
}

/// Kernel side state only touched by the control loop, besides the poller reading the registry.
struct Control<'a> {
	inotify: &'a Inotify,
	registry: &'a Mutex<WatchRegistry>,
	errors: &'a dyn ErrorSink,
}

impl Control<'_> {
	fn handle(&self, command: Command<DriverCommand>) {
		let (kind, reply) = command.into_parts();

		let res = match kind {
			DriverCommand::Add(path) => self.add(path),
			DriverCommand::Remove(path) => self.remove(&path),
		};

		match reply {
			Some(reply) => reply.resolve(res),
			None => {
				if let Err(e) = res {
					self.errors.error(e);
				}
			}
		}
	}

	fn add(&self, path: PathBuf) -> Result<()> {
		let mut flags = AGNOSTIC_EVENTS;
		let mut mask = flags;
		if let Some(watch) = self.registry.lock().get(&path) {
			flags |= watch.flags;
			mask = flags | WatchMask::MASK_ADD;
		}

		// The registry lock is not held across the syscall, the poller needs it to dispatch
		let wd = self
			.inotify
			.watches()
			.add(&path, mask)
			.map_err(|source| Error::AddWatch {
				path: path.as_path().into(),
				source,
			})?;

		trace!(path = %path.display(), id = %WatchId::from(&wd), "Watch added");

		self.registry.lock().insert(path, wd, flags);

		Ok(())
	}

	fn remove(&self, path: &Path) -> Result<()> {
		let Some(watch) = self.registry.lock().remove(path) else {
			return Err(Error::NotWatched(path.into()));
		};

		trace!(path = %path.display(), id = %watch.id, "Removing watch");

		self.inotify
			.watches()
			.remove(watch.wd)
			.map_err(|source| Error::RemoveWatch {
				path: path.into(),
				source,
			})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{ChannelErrorSink, ChannelEventSink, Event, Op};

	use std::{fs, time::Duration};

	use tempfile::tempdir;
	use tokio::time::timeout;
	use tracing_test::traced_test;

	const TIMEOUT: Duration = Duration::from_secs(5);

	struct Running {
		driver: Arc<InotifyDriver>,
		stop: CancellationToken,
		events_rx: chan::Receiver<Event>,
		errors_rx: chan::Receiver<Error>,
		handle: tokio::task::JoinHandle<()>,
	}

	async fn start(config: Config) -> Running {
		let driver = Arc::new(InotifyDriver::with_config(config));
		let stop = CancellationToken::new();
		let (events_tx, events_rx) = chan::unbounded();
		let (errors_tx, errors_rx) = chan::unbounded();
		let (ready_tx, ready_rx) = oneshot::channel();

		let handle = spawn({
			let driver = Arc::clone(&driver);
			let stop = stop.clone();
			async move {
				driver
					.run(
						stop,
						ready_tx,
						Arc::new(ChannelEventSink(events_tx)),
						Arc::new(ChannelErrorSink(errors_tx)),
					)
					.await;
			}
		});

		timeout(TIMEOUT, ready_rx).await.unwrap().unwrap();

		Running {
			driver,
			stop,
			events_rx,
			errors_rx,
			handle,
		}
	}

	impl Running {
		async fn next_event(&self) -> Event {
			timeout(TIMEOUT, self.events_rx.recv())
				.await
				.expect("timed out waiting for an event")
				.unwrap()
		}

		async fn shutdown(self) {
			self.stop.cancel();
			timeout(TIMEOUT, self.handle).await.unwrap().unwrap();
		}
	}

	#[tokio::test(flavor = "multi_thread")]
	#[traced_test]
	async fn create_in_watched_dir() {
		let dir = tempdir().unwrap();
		let running = start(Config::default()).await;

		running
			.driver
			.add(&running.stop, dir.path())
			.await
			.unwrap();
		assert_eq!(running.driver.pending.len(), 0);

		let file = dir.path().join("new.txt");
		fs::File::create(&file).unwrap();

		let event = running.next_event().await;
		assert_eq!(event.path(), file);
		assert!(event.op().is_set(Op::Create));

		assert!(running.errors_rx.is_empty());
		running.shutdown().await;
	}

	#[tokio::test(flavor = "multi_thread")]
	#[traced_test]
	async fn add_and_remove_failures_are_acknowledged() {
		let dir = tempdir().unwrap();
		let running = start(Config::default()).await;

		let missing = dir.path().join("missing");
		assert!(matches!(
			running.driver.add(&running.stop, &missing).await,
			Err(Error::AddWatch { path, source })
				if *path == *missing && source.kind() == std::io::ErrorKind::NotFound
		));

		assert!(matches!(
			running.driver.remove(&running.stop, dir.path()).await,
			Err(Error::NotWatched(path)) if *path == *dir.path()
		));

		running
			.driver
			.add(&running.stop, dir.path())
			.await
			.unwrap();
		// Adding twice merges into the same watch
		running
			.driver
			.add(&running.stop, dir.path())
			.await
			.unwrap();
		running
			.driver
			.remove(&running.stop, dir.path())
			.await
			.unwrap();

		assert!(running.errors_rx.is_empty());
		running.shutdown().await;
	}

	#[tokio::test(flavor = "multi_thread")]
	#[traced_test]
	async fn unacknowledged_failures_go_to_the_error_sink() {
		let dir = tempdir().unwrap();
		let running = start(Config::default().with_acknowledge(false)).await;

		running
			.driver
			.add(&running.stop, &dir.path().join("missing"))
			.await
			.unwrap();

		let error = timeout(TIMEOUT, running.errors_rx.recv())
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(error, Error::AddWatch { .. }));

		running.shutdown().await;
	}

	#[tokio::test(flavor = "multi_thread")]
	#[traced_test]
	async fn stopping_resolves_pending_requests() {
		let driver = InotifyDriver::new();
		let stop = CancellationToken::new();

		// Not running, so only cancellation can end the wait
		let add = {
			let stop = stop.clone();
			async move { driver.add(&stop, Path::new("/")).await }
		};
		let handle = spawn(add);

		tokio::time::sleep(Duration::from_millis(50)).await;
		stop.cancel();

		assert!(matches!(
			timeout(TIMEOUT, handle).await.unwrap().unwrap(),
			Err(Error::Cancelled)
		));
	}
}
