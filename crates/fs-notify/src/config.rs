use serde::{Deserialize, Serialize};

/// Size of a `struct inotify_event` without its trailing name
pub const EVENT_HEADER_SIZE: usize = 16;

/// Tunables of the inotify driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Bytes requested from the kernel on each read
	pub read_buffer_size: usize,
	/// Ready descriptors a single poll is expected to report at most
	pub max_ready_events: usize,
	/// Whether [`Driver::add`] and [`Driver::remove`] wait for the driver to apply the change
	///
	/// [`Driver::add`]: crate::Driver::add
	/// [`Driver::remove`]: crate::Driver::remove
	pub acknowledge: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			read_buffer_size: EVENT_HEADER_SIZE * 4096,
			max_ready_events: 6,
			acknowledge: true,
		}
	}
}

impl Config {
	#[must_use]
	pub const fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
		self.read_buffer_size = read_buffer_size;
		self
	}

	#[must_use]
	pub const fn with_acknowledge(mut self, acknowledge: bool) -> Self {
		self.acknowledge = acknowledge;
		self
	}

	/// Read buffers smaller than a header plus the longest file name could never fit a record.
	pub(crate) fn effective_read_buffer_size(&self) -> usize {
		self.read_buffer_size.max(EVENT_HEADER_SIZE + NAME_MAX + 1)
	}
}

const NAME_MAX: usize = 255;
