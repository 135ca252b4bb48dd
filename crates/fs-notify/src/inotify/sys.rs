//! Glue between the `inotify` crate and the raw record stream we decode ourselves.

use std::{
	fmt,
	fs::File,
	io::{self, Read},
	os::fd::{AsFd, AsRawFd, RawFd},
};

pub use ::inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};

/// Everything a watch asks for, regardless of what the caller is interested in.
pub const AGNOSTIC_EVENTS: WatchMask = WatchMask::MOVED_TO
	.union(WatchMask::MOVED_FROM)
	.union(WatchMask::CREATE)
	.union(WatchMask::ATTRIB)
	.union(WatchMask::MODIFY)
	.union(WatchMask::MOVE_SELF)
	.union(WatchMask::DELETE)
	.union(WatchMask::DELETE_SELF);

/// Kernel id of a watch, as it shows up in the `wd` field of each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub(crate) i32);

impl From<&WatchDescriptor> for WatchId {
	fn from(wd: &WatchDescriptor) -> Self {
		Self(wd.get_watch_descriptor_id())
	}
}

impl fmt::Display for WatchId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Duplicate of the inotify fd used for raw reads.
///
/// Both fds share one open file description, so this one is non-blocking too and drains the
/// same kernel queue the [`Inotify`] instance adds watches to.
#[derive(Debug)]
pub struct EventReader(File);

impl EventReader {
	pub fn new(inotify: &Inotify) -> io::Result<Self> {
		inotify
			.as_fd()
			.try_clone_to_owned()
			.map(|fd| Self(File::from(fd)))
	}

	pub fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
		(&self.0).read(buffer)
	}
}

impl AsRawFd for EventReader {
	fn as_raw_fd(&self) -> RawFd {
		self.0.as_raw_fd()
	}
}
