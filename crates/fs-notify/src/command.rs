//! Command queue sitting between requesters and the single task that owns a driver.
//!
//! Requesters append commands without ever waiting on the consumer, a dedicated drain task moves
//! them in FIFO batches to whichever channel the [`EgressChooser`] picks for each one.

use crate::{Error, Result};

use std::{collections::VecDeque, fmt};

use async_channel as chan;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Max number of commands moved out of the pending list per drain iteration
pub const DRAIN_BATCH_SIZE: usize = 32;

/// One-shot acknowledgment channel attached to a [`Command`].
///
/// Dropping it without resolving tells the requester the command was cancelled.
#[derive(Debug)]
pub struct Reply(Option<oneshot::Sender<Result<()>>>);

impl Reply {
	pub fn resolve(mut self, result: Result<()>) {
		if let Some(tx) = self.0.take() {
			if tx.send(result).is_err() {
				trace!("Requester stopped waiting for the command reply");
			}
		}
	}

	/// Closes the reply without an error.
	pub fn close(self) {
		self.resolve(Ok(()));
	}
}

impl Drop for Reply {
	fn drop(&mut self) {
		if let Some(tx) = self.0.take() {
			// Nobody handled the command, the requester must not wait forever
			let _ = tx.send(Err(Error::Cancelled));
		}
	}
}

pub struct Command<T> {
	kind: T,
	reply: Option<Reply>,
}

impl<T> Command<T> {
	pub const fn new(kind: T) -> Self {
		Self { kind, reply: None }
	}

	pub const fn kind(&self) -> &T {
		&self.kind
	}

	#[must_use]
	pub const fn wants_reply(&self) -> bool {
		self.reply.is_some()
	}

	pub fn into_parts(self) -> (T, Option<Reply>) {
		(self.kind, self.reply)
	}

	fn with_reply(kind: T) -> (Self, oneshot::Receiver<Result<()>>) {
		let (tx, rx) = oneshot::channel();
		(
			Self {
				kind,
				reply: Some(Reply(Some(tx))),
			},
			rx,
		)
	}
}

impl<T: fmt::Debug> fmt::Debug for Command<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Command")
			.field("kind", &self.kind)
			.field("wants_reply", &self.wants_reply())
			.finish()
	}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
	/// Wait until the consumer replies to the command
	pub acknowledge: bool,
}

impl SendOptions {
	#[must_use]
	pub const fn ack() -> Self {
		Self { acknowledge: true }
	}
}

/// Picks the channel each drained command must be delivered to.
///
/// Returning `None` means the routing table is incomplete, which stops the drain task.
pub trait EgressChooser<T>: Send + Sync {
	fn choose(&self, command: &Command<T>) -> Option<chan::Sender<Command<T>>>;
}

impl<T, F> EgressChooser<T> for F
where
	F: Fn(&Command<T>) -> Option<chan::Sender<Command<T>>> + Send + Sync,
{
	fn choose(&self, command: &Command<T>) -> Option<chan::Sender<Command<T>>> {
		self(command)
	}
}

pub struct CommandQueue<T> {
	pending: Mutex<VecDeque<Command<T>>>,
	wakeup: Notify,
}

impl<T> Default for CommandQueue<T> {
	fn default() -> Self {
		Self {
			pending: Mutex::new(VecDeque::new()),
			wakeup: Notify::new(),
		}
	}
}

impl<T> fmt::Debug for CommandQueue<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CommandQueue")
			.field("pending", &self.len())
			.finish_non_exhaustive()
	}
}

impl<T> CommandQueue<T> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn append(&self, command: Command<T>) {
		self.pending.lock().push_back(command);
		self.wakeup.notify_one();
	}

	/// Queues a command built from `kind`; with [`SendOptions::acknowledge`] set, waits for the
	/// consumer's reply and returns the error it produced, if any.
	pub async fn send_command(&self, kind: T, options: SendOptions) -> Result<()> {
		if !options.acknowledge {
			self.append(Command::new(kind));
			return Ok(());
		}

		let (command, reply_rx) = Command::with_reply(kind);
		self.append(command);

		reply_rx.await.unwrap_or(Err(Error::Cancelled))
	}

	/// Wakes the drain task without queueing anything, so it can observe cancellation.
	pub fn wake(&self) {
		self.wakeup.notify_one();
	}

	/// Drops every pending command, resolving their replies as cancelled.
	pub fn clear(&self) {
		let dropped = std::mem::take(&mut *self.pending.lock());
		if !dropped.is_empty() {
			trace!(count = dropped.len(), "Dropping pending commands;");
		}
	}

	pub fn len(&self) -> usize {
		self.pending.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.pending.lock().is_empty()
	}

	fn take_batch(&self, batch: &mut Vec<Command<T>>) -> bool {
		let mut pending = self.pending.lock();
		let count = pending.len().min(DRAIN_BATCH_SIZE);
		batch.extend(pending.drain(..count));

		count > 0
	}
}

impl<T: fmt::Debug + Send> CommandQueue<T> {
	/// Moves commands to their egress channels until `stop` is cancelled.
	///
	/// Only one task may drain a given queue at a time.
	pub async fn drain(&self, stop: &CancellationToken, chooser: &impl EgressChooser<T>) -> Result<()> {
		let mut batch = Vec::with_capacity(DRAIN_BATCH_SIZE);

		loop {
			while !self.take_batch(&mut batch) {
				tokio::select! {
					() = stop.cancelled() => return Ok(()),
					() = self.wakeup.notified() => {}
				}
			}

			for command in batch.drain(..) {
				let Some(egress) = chooser.choose(&command) else {
					return Err(Error::UnroutableCommand(format!("{:?}", command.kind())));
				};

				tokio::select! {
					biased;

					() = stop.cancelled() => return Ok(()),
					res = egress.send(command) => {
						if let Err(chan::SendError(command)) = res {
							warn!(?command, "Egress channel closed, dropping command;");
						}
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::{io, sync::Arc, time::Duration};

	use tokio::{spawn, time::timeout};
	use tracing_test::traced_test;

	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	enum Kind {
		Even(u32),
		Odd(u32),
		Unknown,
	}

	fn parity_chooser(
		even_tx: chan::Sender<Command<Kind>>,
		odd_tx: chan::Sender<Command<Kind>>,
	) -> impl EgressChooser<Kind> {
		move |command: &Command<Kind>| match command.kind() {
			Kind::Even(_) => Some(even_tx.clone()),
			Kind::Odd(_) => Some(odd_tx.clone()),
			Kind::Unknown => None,
		}
	}

	#[tokio::test]
	#[traced_test]
	async fn routes_in_fifo_order() {
		let queue = Arc::new(CommandQueue::new());
		let stop = CancellationToken::new();

		let (even_tx, even_rx) = chan::unbounded();
		let (odd_tx, odd_rx) = chan::unbounded();

		for i in 0..100 {
			queue.append(Command::new(if i % 2 == 0 {
				Kind::Even(i)
			} else {
				Kind::Odd(i)
			}));
		}

		let handle = spawn({
			let queue = Arc::clone(&queue);
			let stop = stop.clone();
			async move { queue.drain(&stop, &parity_chooser(even_tx, odd_tx)).await }
		});

		for expected in (0..100).step_by(2) {
			let command = timeout(Duration::from_secs(5), even_rx.recv())
				.await
				.unwrap()
				.unwrap();
			assert_eq!(*command.kind(), Kind::Even(expected));
		}
		for expected in (1..100).step_by(2) {
			let command = timeout(Duration::from_secs(5), odd_rx.recv())
				.await
				.unwrap()
				.unwrap();
			assert_eq!(*command.kind(), Kind::Odd(expected));
		}

		assert!(queue.is_empty());

		stop.cancel();
		assert!(handle.await.unwrap().is_ok());
	}

	#[tokio::test]
	async fn unroutable_command_stops_the_drain() {
		let queue = CommandQueue::new();
		let stop = CancellationToken::new();
		let (tx, _rx) = chan::unbounded();

		queue.append(Command::new(Kind::Unknown));

		let res = timeout(
			Duration::from_secs(5),
			queue.drain(&stop, &parity_chooser(tx.clone(), tx)),
		)
		.await
		.unwrap();

		assert!(matches!(res, Err(Error::UnroutableCommand(kind)) if kind == "Unknown"));
	}

	#[tokio::test]
	async fn ack_returns_the_handler_error() {
		let queue = Arc::new(CommandQueue::new());
		let stop = CancellationToken::new();
		let (tx, rx) = chan::bounded(1);

		let drain = spawn({
			let queue = Arc::clone(&queue);
			let stop = stop.clone();
			async move { queue.drain(&stop, &parity_chooser(tx.clone(), tx)).await }
		});

		let handler = spawn(async move {
			while let Ok(command) = rx.recv().await {
				let (kind, reply) = command.into_parts();
				let Some(reply) = reply else { continue };
				match kind {
					Kind::Even(_) => reply.close(),
					_ => reply.resolve(Err(Error::NotWatched(
						std::path::Path::new("/nowhere").into(),
					))),
				}
			}
		});

		assert!(queue
			.send_command(Kind::Even(2), SendOptions::ack())
			.await
			.is_ok());
		assert!(matches!(
			queue.send_command(Kind::Odd(3), SendOptions::ack()).await,
			Err(Error::NotWatched(path)) if &*path == std::path::Path::new("/nowhere")
		));

		stop.cancel();
		drain.await.unwrap().unwrap();
		handler.abort();
	}

	#[tokio::test]
	async fn fire_and_forget_returns_immediately() {
		let queue = CommandQueue::new();

		queue
			.send_command(Kind::Even(0), SendOptions::default())
			.await
			.unwrap();

		assert_eq!(queue.len(), 1);
	}

	#[tokio::test]
	async fn cancelled_drain_resolves_pending_acks() {
		let queue = Arc::new(CommandQueue::new());
		let stop = CancellationToken::new();
		stop.cancel();

		let requester = spawn({
			let queue = Arc::clone(&queue);
			async move { queue.send_command(Kind::Even(0), SendOptions::ack()).await }
		});

		let (tx, _rx) = chan::bounded(1);
		queue.drain(&stop, &parity_chooser(tx.clone(), tx)).await.unwrap();

		// Nobody will consume it anymore
		while queue.is_empty() {
			tokio::task::yield_now().await;
		}
		queue.clear();

		let res = timeout(Duration::from_secs(5), requester)
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(res, Err(Error::Cancelled)));
	}

	#[test]
	fn dropped_reply_is_cancelled() {
		let (command, mut rx) = Command::with_reply(Kind::Even(0));
		drop(command);

		assert!(matches!(rx.try_recv(), Ok(Err(Error::Cancelled))));
	}

	#[test]
	fn io_errors_survive_the_reply() {
		let (command, mut rx) = Command::with_reply(Kind::Odd(1));
		let (_, reply) = command.into_parts();
		reply.unwrap().resolve(Err(Error::ReadEvents(io::Error::from_raw_os_error(2))));

		assert!(matches!(
			rx.try_recv(),
			Ok(Err(Error::ReadEvents(e))) if e.raw_os_error() == Some(2)
		));
	}
}
