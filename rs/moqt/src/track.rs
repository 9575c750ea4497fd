use tokio::sync::watch;
use web_async::Lock;

use crate::{
	coding::Writer,
	group::{GroupQueue, GroupReader, GroupWriter},
	message::{self, GroupOrder, Parameters, SubscribeUpdate},
	scheduler::GroupScheduler,
	Error,
};

/// The negotiated shape of a subscription.
///
/// A zero sequence bound means "open" on that side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackConfig {
	pub priority: u8,
	pub group_order: GroupOrder,
	pub min_group_sequence: u64,
	pub max_group_sequence: u64,
	pub parameters: Parameters,
}

impl TrackConfig {
	/// Whether a group sequence falls within the subscribed range.
	pub fn in_range(&self, sequence: u64) -> bool {
		(self.min_group_sequence == 0 || sequence >= self.min_group_sequence)
			&& (self.max_group_sequence == 0 || sequence <= self.max_group_sequence)
	}

	pub(crate) fn validate(&self) -> Result<(), Error> {
		if self.min_group_sequence != 0
			&& self.max_group_sequence != 0
			&& self.min_group_sequence > self.max_group_sequence
		{
			return Err(Error::InvalidRange);
		}
		Ok(())
	}

	/// Apply an update under the tightening rule: a non-zero minimum may only
	/// grow and a non-zero maximum may only shrink. Zero leaves a bound
	/// unchanged.
	///
	/// The config is untouched when the update is rejected.
	pub(crate) fn apply_update(&mut self, update: &SubscribeUpdate) -> Result<(), Error> {
		let min = match update.min_group_sequence {
			0 => self.min_group_sequence,
			min if min < self.min_group_sequence => return Err(Error::InvalidRange),
			min => min,
		};

		let max = match update.max_group_sequence {
			0 => self.max_group_sequence,
			max if self.max_group_sequence != 0 && max > self.max_group_sequence => {
				return Err(Error::InvalidRange)
			}
			max => max,
		};

		if min != 0 && max != 0 && min > max {
			return Err(Error::InvalidRange);
		}

		self.priority = update.priority;
		self.min_group_sequence = min;
		self.max_group_sequence = max;
		self.parameters = update.parameters.clone();

		Ok(())
	}
}

/// The publisher's handle to a single subscription, given to the track
/// handler resolved through the multiplexer.
///
/// Owns the write half of the subscribe stream; dropping the writer aborts
/// the subscription.
pub struct TrackWriter<S: web_transport_trait::Session> {
	session: S,
	subscribe_id: u64,
	broadcast: String,
	track: String,

	// Updated in place by the subscribe stream's update loop.
	config: Lock<TrackConfig>,
	scheduler: GroupScheduler,
	stream: Writer<S::SendStream>,
	closed: watch::Receiver<Option<Error>>,

	// Sequences already opened; each gets at most one stream.
	opened: std::collections::HashSet<u64>,
}

impl<S: web_transport_trait::Session> TrackWriter<S> {
	#[allow(clippy::too_many_arguments)]
	pub(crate) fn new(
		session: S,
		subscribe_id: u64,
		broadcast: String,
		track: String,
		config: Lock<TrackConfig>,
		scheduler: GroupScheduler,
		stream: Writer<S::SendStream>,
		closed: watch::Receiver<Option<Error>>,
	) -> Self {
		Self {
			session,
			subscribe_id,
			broadcast,
			track,
			config,
			scheduler,
			stream,
			closed,
			opened: Default::default(),
		}
	}

	pub fn broadcast(&self) -> &str {
		&self.broadcast
	}

	pub fn track(&self) -> &str {
		&self.track
	}

	pub fn subscribe_id(&self) -> u64 {
		self.subscribe_id
	}

	/// The current subscription config, reflecting any updates received.
	pub fn config(&self) -> TrackConfig {
		self.config.lock().clone()
	}

	/// Open a unidirectional stream for the given group sequence.
	///
	/// Fails with [Error::OutOfRange] when the sequence is zero, outside the
	/// subscribed range, or already opened; a sequence gets at most one
	/// stream for the life of the subscription.
	pub async fn open_group(&mut self, sequence: u64) -> Result<GroupWriter<S::SendStream>, Error> {
		if sequence == 0 || self.opened.contains(&sequence) {
			return Err(Error::OutOfRange);
		}

		if let Some(err) = self.closed.borrow().clone() {
			return Err(err);
		}

		let config = self.config();
		if !config.in_range(sequence) {
			return Err(Error::OutOfRange);
		}

		let stream = self
			.session
			.open_uni()
			.await
			.map_err(Error::from_transport)?;

		let mut writer = Writer::new(stream);
		writer.encode(&message::UniStreamType::Group).await?;
		writer
			.encode(&message::Group {
				subscribe_id: self.subscribe_id,
				sequence,
			})
			.await?;

		tracing::trace!(id = self.subscribe_id, sequence, "opened group");
		self.opened.insert(sequence);

		let schedule = self.scheduler.insert(config.priority);
		Ok(GroupWriter::new(writer, sequence, schedule))
	}

	/// Signal that no more groups will ever be produced.
	pub fn close(mut self) -> Result<(), Error> {
		self.stream.finish()
	}

	/// Abort the subscription with the given error.
	pub fn abort(mut self, err: &Error) {
		self.stream.abort(err);
	}

	/// Wait until the subscriber ends the subscription or the session fails.
	pub async fn closed(&mut self) -> Error {
		loop {
			if let Some(err) = self.closed.borrow_and_update().clone() {
				return err;
			}

			if self.closed.changed().await.is_err() {
				return Error::Cancel;
			}
		}
	}
}

/// The subscriber's handle to a single subscription.
///
/// Owns the write half of the subscribe stream; groups arrive through the
/// session's demultiplexer.
pub struct TrackReader<S: web_transport_trait::Session> {
	subscribe_id: u64,
	broadcast: String,
	track: String,

	config: Lock<TrackConfig>,
	queue: GroupQueue<GroupReader<S::RecvStream>>,
	stream: Writer<S::SendStream>,
}

impl<S: web_transport_trait::Session> std::fmt::Debug for TrackReader<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TrackReader")
			.field("subscribe_id", &self.subscribe_id)
			.field("broadcast", &self.broadcast)
			.field("track", &self.track)
			.finish_non_exhaustive()
	}
}

impl<S: web_transport_trait::Session> TrackReader<S> {
	pub(crate) fn new(
		subscribe_id: u64,
		broadcast: String,
		track: String,
		config: Lock<TrackConfig>,
		queue: GroupQueue<GroupReader<S::RecvStream>>,
		stream: Writer<S::SendStream>,
	) -> Self {
		Self {
			subscribe_id,
			broadcast,
			track,
			config,
			queue,
			stream,
		}
	}

	pub fn broadcast(&self) -> &str {
		&self.broadcast
	}

	pub fn track(&self) -> &str {
		&self.track
	}

	pub fn subscribe_id(&self) -> u64 {
		self.subscribe_id
	}

	pub fn config(&self) -> TrackConfig {
		self.config.lock().clone()
	}

	/// The next group in arrival order.
	///
	/// Returns [Error::Closed] after the publisher finishes the subscription
	/// and all queued groups have been read.
	pub async fn accept_group(&mut self) -> Result<GroupReader<S::RecvStream>, Error> {
		self.queue.pop().await
	}

	/// Tighten the subscription and notify the publisher.
	///
	/// The new bounds apply immediately to newly arriving groups.
	pub async fn update(&mut self, update: SubscribeUpdate) -> Result<(), Error> {
		self.config.lock().apply_update(&update)?;
		self.stream.encode_message(&update).await
	}

	/// End the subscription cleanly.
	pub fn close(mut self) -> Result<(), Error> {
		self.stream.finish()
	}

	/// Abort the subscription with the given error.
	pub fn cancel(mut self, err: &Error) {
		self.stream.abort(err);
		self.queue.abort(err.clone());
	}
}
