//! Decoding of the packed `struct inotify_event` records read from the inotify fd and their
//! translation into [`Event`]s.

use super::{
	registry::WatchRegistry,
	sys::{EventMask, WatchId},
};
use crate::{config::EVENT_HEADER_SIZE, Error, ErrorSink, Event, EventSink, Op, OpMask, Result};

use std::{
	ffi::OsStr,
	io,
	os::unix::ffi::OsStrExt,
	path::Path,
};

use parking_lot::Mutex;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord<'buf> {
	pub wd: WatchId,
	pub mask: EventMask,
	pub cookie: u32,
	/// Entry inside a watched directory, `None` when the event is about the watched path itself
	pub name: Option<&'buf OsStr>,
}

/// Iterates the records of one read, in kernel order.
///
/// Layout of each record, native endian: `wd: i32`, `mask: u32`, `cookie: u32`, `len: u32`, then
/// `len` bytes of NUL padded name.
pub struct Records<'buf> {
	buf: &'buf [u8],
	offset: usize,
}

impl<'buf> Records<'buf> {
	pub const fn new(buf: &'buf [u8]) -> Self {
		Self { buf, offset: 0 }
	}
}

impl<'buf> Iterator for Records<'buf> {
	type Item = Result<RawRecord<'buf>>;

	fn next(&mut self) -> Option<Self::Item> {
		let offset = self.offset;
		let header = self.buf.get(offset..offset + EVENT_HEADER_SIZE)?;

		let wd = i32::from_ne_bytes(word(header, 0));
		let mask = u32::from_ne_bytes(word(header, 4));
		let cookie = u32::from_ne_bytes(word(header, 8));
		let len = u32::from_ne_bytes(word(header, 12)) as usize;

		let name_start = offset + EVENT_HEADER_SIZE;
		let Some(raw_name) = self.buf.get(name_start..name_start + len) else {
			self.offset = self.buf.len();
			return Some(Err(Error::TruncatedRecord {
				offset,
				read: self.buf.len(),
			}));
		};
		self.offset = name_start + len;

		let name = trim_padding(raw_name);

		Some(Ok(RawRecord {
			wd: WatchId(wd),
			mask: EventMask::from_bits_truncate(mask),
			cookie,
			name: (!name.is_empty()).then(|| OsStr::from_bytes(name)),
		}))
	}
}

fn word(header: &[u8], at: usize) -> [u8; 4] {
	[header[at], header[at + 1], header[at + 2], header[at + 3]]
}

fn trim_padding(name: &[u8]) -> &[u8] {
	let end = name.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);
	&name[..end]
}

/// Maps raw inotify bits to portable operations.
pub fn op_mask(raw: EventMask) -> OpMask {
	let mut mask = OpMask::empty();

	if raw.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
		mask.set(Op::Create);
	}
	if raw.intersects(EventMask::DELETE_SELF | EventMask::DELETE) {
		mask.set(Op::Remove);
	}
	if raw.contains(EventMask::MODIFY) {
		mask.set(Op::Write);
	}
	if raw.intersects(EventMask::MOVE_SELF | EventMask::MOVED_FROM) {
		mask.set(Op::Rename);
	}
	if raw.contains(EventMask::ATTRIB) {
		mask.set(Op::Chmod);
	}

	mask
}

/// Whether an event must not reach the sink.
///
/// Besides events the kernel flags as ignored, anything that isn't a removal or a rename needs
/// its path to still exist: inotify sometimes reports a modification right after a delete. The
/// check races with the path being created again, so it's an approximation.
fn should_ignore(path: &Path, mask: OpMask, raw: EventMask, errors: &dyn ErrorSink) -> bool {
	if raw.contains(EventMask::IGNORED) {
		return true;
	}

	if mask.is_set(Op::Remove) || mask.is_set(Op::Rename) {
		return false;
	}

	match path.symlink_metadata() {
		Ok(_) => false,
		Err(e) if e.kind() == io::ErrorKind::NotFound => {
			trace!(?path, %mask, "Dropping event for a path that no longer exists");
			true
		}
		Err(e) => {
			errors.error(Error::Stat {
				path: path.into(),
				source: e,
			});
			false
		}
	}
}

/// Translates every record of one read and hands the surviving events to `events`, in order.
pub fn dispatch(
	buf: &[u8],
	registry: &Mutex<WatchRegistry>,
	events: &dyn EventSink,
	errors: &dyn ErrorSink,
) {
	for record in Records::new(buf) {
		let record = match record {
			Ok(record) => record,
			Err(e) => {
				errors.error(e);
				break;
			}
		};

		if record.mask.contains(EventMask::Q_OVERFLOW) {
			errors.error(Error::QueueOverflow);
			continue;
		}

		let path = {
			let mut registry = registry.lock();
			if record.mask.intersects(EventMask::DELETE_SELF | EventMask::IGNORED) {
				// The kernel already dropped this watch
				registry.retire(record.wd)
			} else {
				registry.path_of(record.wd).map(Path::to_path_buf)
			}
		};

		let Some(mut path) = path else {
			if !record.mask.contains(EventMask::IGNORED) {
				debug!(wd = %record.wd, mask = ?record.mask, "Dropping event for an unknown watch");
			}
			continue;
		};

		if let Some(name) = record.name {
			path.push(name);
		}

		let mask = op_mask(record.mask);
		if record.cookie != 0 {
			trace!(?path, cookie = record.cookie, %mask, "Rename half");
		}
		if should_ignore(&path, mask, record.mask, errors) {
			continue;
		}

		events.event(Event::new(path, mask));
	}
}
