use crate::{ErrorSink, EventSink, Result};

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// The OS specific backend behind a [`Watcher`](crate::Watcher).
#[async_trait]
pub trait Driver: Send + Sync + 'static {
	/// Starts watching `path`.
	async fn add(&self, stop: &CancellationToken, path: &Path) -> Result<()>;

	/// Stops watching `path`.
	async fn remove(&self, stop: &CancellationToken, path: &Path) -> Result<()>;

	/// Runs the driver until `stop` is cancelled.
	///
	/// `ready` must be fired once the driver accepts [`Driver::add`] and [`Driver::remove`]
	/// calls. A driver that fails to set itself up reports it to `errors` and returns without
	/// firing `ready`.
	async fn run(
		&self,
		stop: CancellationToken,
		ready: oneshot::Sender<()>,
		events: Arc<dyn EventSink>,
		errors: Arc<dyn ErrorSink>,
	);
}

/// Driver for platforms without a notification facility, nothing is ever delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDriver;

#[async_trait]
impl Driver for NullDriver {
	async fn add(&self, _: &CancellationToken, _: &Path) -> Result<()> {
		Ok(())
	}

	async fn remove(&self, _: &CancellationToken, _: &Path) -> Result<()> {
		Ok(())
	}

	async fn run(
		&self,
		stop: CancellationToken,
		ready: oneshot::Sender<()>,
		_: Arc<dyn EventSink>,
		_: Arc<dyn ErrorSink>,
	) {
		let _ = ready.send(());
		stop.cancelled().await;
	}
}

/// The driver matching the platform we were built for.
#[must_use]
pub fn default_driver() -> Arc<dyn Driver> {
	#[cfg(any(target_os = "linux", target_os = "android"))]
	{
		Arc::new(crate::inotify::InotifyDriver::new())
	}

	#[cfg(not(any(target_os = "linux", target_os = "android")))]
	{
		Arc::new(NullDriver)
	}
}
