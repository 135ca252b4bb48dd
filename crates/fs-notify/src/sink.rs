use crate::{Error, Event};

use async_channel as chan;
use tracing::warn;

/// Destination of every event produced by a driver.
///
/// Called synchronously from the driver's poll loop, so implementations must return quickly.
pub trait EventSink: Send + Sync + 'static {
	fn event(&self, event: Event);
}

/// Destination of errors that happen while watching. Must never block.
pub trait ErrorSink: Send + Sync + 'static {
	fn error(&self, error: Error);
}

impl<F> EventSink for F
where
	F: Fn(Event) + Send + Sync + 'static,
{
	fn event(&self, event: Event) {
		self(event);
	}
}

impl<F> ErrorSink for F
where
	F: Fn(Error) + Send + Sync + 'static,
{
	fn error(&self, error: Error) {
		self(error);
	}
}

/// Discards everything, used when no sink is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
	fn event(&self, _: Event) {}
}

impl ErrorSink for NullSink {
	fn error(&self, _: Error) {}
}

/// Forwards events into a channel, waiting for room when it is full so no event is lost.
///
/// Drivers call sinks from their own blocking threads, but a bounded channel must not be drained
/// by the same thread that produces into it.
#[derive(Debug, Clone)]
pub struct ChannelEventSink(pub chan::Sender<Event>);

impl EventSink for ChannelEventSink {
	fn event(&self, event: Event) {
		if let Err(chan::SendError(event)) = self.0.send_blocking(event) {
			warn!(%event, "Dropping event, sink channel is closed;");
		}
	}
}

/// Forwards errors into a channel; errors are dropped with a warning if the channel is full.
#[derive(Debug, Clone)]
pub struct ChannelErrorSink(pub chan::Sender<Error>);

impl ErrorSink for ChannelErrorSink {
	fn error(&self, error: Error) {
		if let Err(e) = self.0.try_send(error) {
			warn!(error = %e.into_inner(), "Dropping error, sink channel is full or closed;");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{Op, OpMask};

	#[test]
	fn channel_sinks_forward() {
		let (events_tx, events_rx) = chan::unbounded();
		let (errors_tx, errors_rx) = chan::unbounded();

		ChannelEventSink(events_tx).event(Event::new("/a", OpMask::from(Op::Write)));
		ChannelErrorSink(errors_tx).error(Error::QueueOverflow);

		assert_eq!(
			events_rx.try_recv().unwrap(),
			Event::new("/a", OpMask::from(Op::Write))
		);
		assert!(errors_rx.try_recv().unwrap().is_overflow());
	}

	#[test]
	fn full_channel_waits_for_the_consumer() {
		let (events_tx, events_rx) = chan::bounded(1);
		let sink = ChannelEventSink(events_tx);

		let consumer = std::thread::spawn(move || {
			std::thread::sleep(std::time::Duration::from_millis(100));
			std::iter::from_fn(|| events_rx.recv_blocking().ok()).collect::<Vec<_>>()
		});

		sink.event(Event::new("/first", OpMask::from(Op::Create)));
		sink.event(Event::new("/second", OpMask::from(Op::Write)));
		sink.event(Event::new("/third", OpMask::from(Op::Remove)));
		drop(sink);

		let paths = consumer
			.join()
			.unwrap()
			.into_iter()
			.map(Event::into_path)
			.collect::<Vec<_>>();
		assert_eq!(
			paths,
			["/first", "/second", "/third"].map(std::path::PathBuf::from)
		);
	}

	#[test]
	fn full_error_channel_never_blocks() {
		let (errors_tx, errors_rx) = chan::bounded(1);
		let sink = ChannelErrorSink(errors_tx);

		sink.error(Error::QueueOverflow);
		sink.error(Error::UnexpectedEof);

		assert!(errors_rx.try_recv().unwrap().is_overflow());
		assert!(errors_rx.try_recv().is_err());
	}

	#[test]
	fn closed_channel_does_not_panic() {
		let (events_tx, events_rx) = chan::bounded(1);
		drop(events_rx);

		ChannelEventSink(events_tx).event(Event::new("/a", OpMask::empty()));
	}
}
