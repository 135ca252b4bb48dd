use super::{record, registry::WatchRegistry, sys::EventReader};
use crate::{config::EVENT_HEADER_SIZE, Config, Error, ErrorSink, EventSink, Result};

use std::{
	io::{self, Read, Write},
	os::fd::AsRawFd,
	sync::Arc,
};

use mio::{
	unix::{pipe, SourceFd},
	Events, Interest, Poll, Token,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

const INOTIFY: Token = Token(0);
const WAKEUP: Token = Token(1);

/// Interrupts a [`Poller`] blocked waiting for events.
#[derive(Debug)]
pub struct Waker(pipe::Sender);

impl Waker {
	pub fn wake(&self) -> io::Result<()> {
		match (&self.0).write(&[1]) {
			// A full pipe already guarantees a wake up
			Err(e) if e.kind() != io::ErrorKind::WouldBlock => Err(e),
			_ => Ok(()),
		}
	}
}

/// Blocking loop waiting on the inotify fd and the wakeup pipe, meant for a blocking thread.
pub struct Poller {
	poll: Poll,
	ready: Events,
	max_ready_events: usize,
	reader: EventReader,
	wakeup_rx: pipe::Receiver,
	buffer: Vec<u8>,
	registry: Arc<Mutex<WatchRegistry>>,
	events: Arc<dyn EventSink>,
	errors: Arc<dyn ErrorSink>,
}

impl Poller {
	pub fn new(
		config: &Config,
		reader: EventReader,
		registry: Arc<Mutex<WatchRegistry>>,
		events: Arc<dyn EventSink>,
		errors: Arc<dyn ErrorSink>,
	) -> Result<(Self, Waker)> {
		let poll = Poll::new().map_err(Error::PollerInit)?;

		poll.registry()
			.register(
				&mut SourceFd(&reader.as_raw_fd()),
				INOTIFY,
				Interest::READABLE,
			)
			.map_err(|source| Error::PollerRegister {
				what: "inotify fd",
				source,
			})?;

		let (wakeup_tx, mut wakeup_rx) = pipe::new().map_err(Error::WakeupPipe)?;

		poll.registry()
			.register(&mut wakeup_rx, WAKEUP, Interest::READABLE)
			.map_err(|source| Error::PollerRegister {
				what: "wakeup pipe",
				source,
			})?;

		Ok((
			Self {
				poll,
				// One extra slot so we can notice when more than expected show up
				ready: Events::with_capacity(config.max_ready_events + 1),
				max_ready_events: config.max_ready_events,
				reader,
				wakeup_rx,
				buffer: vec![0; config.effective_read_buffer_size()],
				registry,
				events,
				errors,
			},
			Waker(wakeup_tx),
		))
	}

	pub fn run(mut self, stop: &CancellationToken) {
		while !stop.is_cancelled() {
			if let Err(e) = self.poll.poll(&mut self.ready, None) {
				if e.kind() == io::ErrorKind::Interrupted {
					continue;
				}

				error!(?e, "Failed to wait for inotify events, stopping poller;");
				self.errors.error(Error::Poll(e));
				return;
			}

			let ready_count = self.ready.iter().count();
			if ready_count == 0 {
				continue;
			}
			if ready_count > self.max_ready_events {
				self.errors.error(Error::TooManyReadyEvents(
					ready_count,
					self.max_ready_events,
				));
				continue;
			}

			let mut inotify_ready = false;
			for event in &self.ready {
				match event.token() {
					// Hang ups and errors still go through a read, which surfaces the actual error
					INOTIFY => {
						inotify_ready |=
							event.is_readable() || event.is_read_closed() || event.is_error();
					}
					WAKEUP => {
						if event.is_readable() {
							if let Err(e) = drain_wakeup(&self.wakeup_rx) {
								self.errors.error(Error::WakeupDrain(e));
							}
						}
					}
					_ => {}
				}
			}

			if inotify_ready {
				self.read_events(stop);
			}
		}

		debug!("Inotify poller stopped");
	}

	/// Reads until the kernel queue is empty, the fd is edge triggered.
	fn read_events(&mut self, stop: &CancellationToken) {
		loop {
			let read = match self.reader.read(&mut self.buffer) {
				Ok(read) => read,
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => {
					self.errors.error(Error::ReadEvents(e));
					return;
				}
			};

			if stop.is_cancelled() {
				return;
			}

			if read == 0 {
				self.errors.error(Error::UnexpectedEof);
				return;
			}
			if read < EVENT_HEADER_SIZE {
				self.errors.error(Error::ShortRead { read });
				return;
			}

			trace!(read, "Read inotify events");

			record::dispatch(
				&self.buffer[..read],
				&self.registry,
				self.events.as_ref(),
				self.errors.as_ref(),
			);
		}
	}
}

fn drain_wakeup(mut wakeup_rx: &pipe::Receiver) -> io::Result<()> {
	let mut buf = [0; 64];
	loop {
		match wakeup_rx.read(&mut buf) {
			Ok(0) => return Ok(()),
			Ok(_) => {}
			Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
			Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
			Err(e) => return Err(e),
		}
	}
}
