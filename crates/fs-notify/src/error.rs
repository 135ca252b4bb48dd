use std::{io, path::Path};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
	// Driver setup
	#[error("failed to create inotify fd: {0}")]
	InotifyInit(#[source] io::Error),
	#[error("failed to create poller: {0}")]
	PollerInit(#[source] io::Error),
	#[error("failed to create wakeup pipe: {0}")]
	WakeupPipe(#[source] io::Error),
	#[error("failed to register {what} on poller: {source}")]
	PollerRegister {
		what: &'static str,
		#[source]
		source: io::Error,
	},

	// Watch management
	#[error("failed to add watch <path='{}'>: {source}", .path.display())]
	AddWatch {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("failed to remove watch <path='{}'>: {source}", .path.display())]
	RemoveWatch {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("path is not being watched <path='{}'>", .0.display())]
	NotWatched(Box<Path>),

	// Event reading
	#[error("failed to wait for events: {0}")]
	Poll(#[source] io::Error),
	#[error("failed to read events: {0}")]
	ReadEvents(#[source] io::Error),
	#[error("unexpected end of file while reading events")]
	UnexpectedEof,
	#[error("short read while reading events <read={read}>")]
	ShortRead { read: usize },
	#[error("event record overruns the read buffer <offset={offset}, read={read}>")]
	TruncatedRecord { offset: usize, read: usize },
	#[error("failed to drain wakeup pipe: {0}")]
	WakeupDrain(#[source] io::Error),
	#[error("poller returned {0} ready events, expected at most {1}")]
	TooManyReadyEvents(usize, usize),
	#[error("fsnotify queue overflow")]
	QueueOverflow,
	#[error("failed to stat event target <path='{}'>: {source}", .path.display())]
	Stat {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},

	// Control plane
	#[error("operation cancelled")]
	Cancelled,
	#[error("driver stopped before signaling readiness")]
	DriverNotReady,
	#[error("no egress channel for command <kind='{0}'>")]
	UnroutableCommand(String),
}

impl Error {
	/// Whether this error only means some events were lost, the driver keeps running.
	#[must_use]
	pub const fn is_overflow(&self) -> bool {
		matches!(self, Self::QueueOverflow)
	}
}
