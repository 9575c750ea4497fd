use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::sync::Notify;
use web_async::Lock;

use crate::{
	coding::{DecodeError, Reader, Writer},
	message,
	scheduler::ScheduleHandle,
	Error, Frame,
};

/// The send half of a group: a unidirectional stream carrying the header and
/// a sequence of frames.
///
/// Dropping the writer without calling [GroupWriter::finish] aborts the
/// stream, cancelling the group.
pub struct GroupWriter<S: web_transport_trait::SendStream> {
	writer: Writer<S>,
	sequence: u64,

	// Holds our slot in the session scheduler; released on drop.
	schedule: ScheduleHandle,
	rank: Option<u8>,
}

impl<S: web_transport_trait::SendStream> GroupWriter<S> {
	pub(crate) fn new(writer: Writer<S>, sequence: u64, schedule: ScheduleHandle) -> Self {
		Self {
			writer,
			sequence,
			schedule,
			rank: None,
		}
	}

	pub fn sequence(&self) -> u64 {
		self.sequence
	}

	/// Append a frame to the group.
	pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
		// The scheduler may have re-ranked us since the last write. The
		// transport sends higher values first, so rank 0 becomes u8::MAX.
		let rank = self.schedule.current();
		if self.rank != Some(rank) {
			self.writer.set_priority(u8::MAX - rank);
			self.rank = Some(rank);
		}

		self.writer.encode(frame).await
	}

	/// Signal a clean end of the group.
	pub fn finish(&mut self) -> Result<(), Error> {
		self.writer.finish()
	}

	/// Abort the group with the given error.
	pub fn abort(&mut self, err: &Error) {
		self.writer.abort(err);
	}
}

/// The receive half of a group.
pub struct GroupReader<S: web_transport_trait::RecvStream> {
	reader: Reader<S>,
	subscribe_id: u64,
	sequence: u64,
}

impl<S: web_transport_trait::RecvStream> GroupReader<S> {
	pub(crate) fn new(reader: Reader<S>, header: message::Group) -> Self {
		Self {
			reader,
			subscribe_id: header.subscribe_id,
			sequence: header.sequence,
		}
	}

	pub fn subscribe_id(&self) -> u64 {
		self.subscribe_id
	}

	pub fn sequence(&self) -> u64 {
		self.sequence
	}

	/// Read the next frame, or None at the clean end of the group.
	pub async fn read_frame(&mut self) -> Result<Option<Frame>, Error> {
		match self.reader.decode_maybe().await {
			// The stream finished in the middle of a frame.
			Err(Error::Decode(DecodeError::Short)) => Err(Error::GroupExpired),
			res => res,
		}
	}

	/// Like [GroupReader::read_frame] but bounded by a deadline.
	pub async fn read_frame_timeout(&mut self, timeout: Duration) -> Result<Option<Frame>, Error> {
		match tokio::time::timeout(timeout, self.read_frame()).await {
			Ok(res) => res,
			Err(_) => Err(Error::Timeout),
		}
	}

	/// Abort the group with the given error.
	pub fn cancel(&mut self, err: &Error) {
		self.reader.abort(err);
	}
}

/// A group that can be cancelled without being read.
///
/// Lets the queue below be exercised without a transport.
pub(crate) trait CancelGroup {
	fn cancel(&mut self, err: &Error);
}

impl<S: web_transport_trait::RecvStream> CancelGroup for GroupReader<S> {
	fn cancel(&mut self, err: &Error) {
		GroupReader::cancel(self, err);
	}
}

/// Don't queue more than this many groups per subscription; the oldest is
/// evicted first.
const MAX_QUEUED: usize = 16;

struct QueueState<G> {
	queue: VecDeque<G>,
	closed: Option<Error>,
}

impl<G> Default for QueueState<G> {
	fn default() -> Self {
		Self {
			queue: VecDeque::new(),
			closed: None,
		}
	}
}

/// A bounded queue of groups awaiting the application.
///
/// Multi-producer, but written for a single consumer: the subscription owner.
pub(crate) struct GroupQueue<G> {
	state: Lock<QueueState<G>>,
	notify: Arc<Notify>,
}

impl<G> Clone for GroupQueue<G> {
	fn clone(&self) -> Self {
		Self {
			state: self.state.clone(),
			notify: self.notify.clone(),
		}
	}
}

impl<G: CancelGroup> GroupQueue<G> {
	pub fn new() -> Self {
		Self {
			state: Lock::new(QueueState::default()),
			notify: Arc::new(Notify::new()),
		}
	}

	/// Enqueue a group, evicting the oldest queued group when full.
	pub fn push(&self, mut group: G) {
		{
			let mut state = self.state.lock();
			if let Some(err) = &state.closed {
				group.cancel(err);
				return;
			}

			if state.queue.len() >= MAX_QUEUED {
				if let Some(mut oldest) = state.queue.pop_front() {
					oldest.cancel(&Error::OutOfRange);
				}
			}

			state.queue.push_back(group);
		}

		self.notify.notify_one();
	}

	/// Dequeue the next group in arrival order.
	///
	/// Groups queued before the close are still delivered; afterwards this
	/// returns the close error.
	pub async fn pop(&self) -> Result<G, Error> {
		loop {
			{
				let mut state = self.state.lock();
				if let Some(group) = state.queue.pop_front() {
					if !state.queue.is_empty() {
						// Leave a wakeup for the next pop.
						self.notify.notify_one();
					}
					return Ok(group);
				}

				if let Some(err) = &state.closed {
					return Err(err.clone());
				}
			}

			self.notify.notified().await;
		}
	}

	/// Refuse new groups, letting already queued groups drain.
	pub fn close(&self, err: Error) {
		{
			let mut state = self.state.lock();
			if state.closed.is_some() {
				return;
			}
			state.closed = Some(err);
		}

		self.notify.notify_one();
	}

	/// Refuse new groups and cancel everything still queued.
	pub fn abort(&self, err: Error) {
		let mut queued = {
			let mut state = self.state.lock();
			if state.closed.is_none() {
				state.closed = Some(err.clone());
			}
			std::mem::take(&mut state.queue)
		};

		for group in queued.iter_mut() {
			group.cancel(&err);
		}

		self.notify.notify_one();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	// Records the cancellation code instead of touching a transport.
	struct FakeGroup {
		sequence: u64,
		cancelled: Arc<Mutex<Vec<(u64, u32)>>>,
	}

	impl CancelGroup for FakeGroup {
		fn cancel(&mut self, err: &Error) {
			self.cancelled.lock().unwrap().push((self.sequence, err.to_code()));
		}
	}

	struct Fixture {
		queue: GroupQueue<FakeGroup>,
		cancelled: Arc<Mutex<Vec<(u64, u32)>>>,
	}

	impl Fixture {
		fn new() -> Self {
			Self {
				queue: GroupQueue::new(),
				cancelled: Default::default(),
			}
		}

		fn group(&self, sequence: u64) -> FakeGroup {
			FakeGroup {
				sequence,
				cancelled: self.cancelled.clone(),
			}
		}
	}

	#[tokio::test]
	async fn arrival_order() {
		let f = Fixture::new();
		f.queue.push(f.group(3));
		f.queue.push(f.group(1));
		f.queue.push(f.group(2));

		assert_eq!(f.queue.pop().await.unwrap().sequence, 3);
		assert_eq!(f.queue.pop().await.unwrap().sequence, 1);
		assert_eq!(f.queue.pop().await.unwrap().sequence, 2);
	}

	#[tokio::test]
	async fn eviction_when_full() {
		let f = Fixture::new();
		for sequence in 0..MAX_QUEUED as u64 + 2 {
			f.queue.push(f.group(sequence));
		}

		// The two oldest were evicted with OutOfRange.
		let cancelled = f.cancelled.lock().unwrap().clone();
		assert_eq!(
			cancelled,
			vec![(0, Error::OutOfRange.to_code()), (1, Error::OutOfRange.to_code())]
		);

		// Delivery resumes from the oldest survivor.
		assert_eq!(f.queue.pop().await.unwrap().sequence, 2);
	}

	#[tokio::test]
	async fn close_drains_queued() {
		let f = Fixture::new();
		f.queue.push(f.group(1));
		f.queue.close(Error::Closed);

		assert_eq!(f.queue.pop().await.unwrap().sequence, 1);
		assert!(matches!(f.queue.pop().await, Err(Error::Closed)));

		// Late arrivals are cancelled with the close error.
		f.queue.push(f.group(2));
		let cancelled = f.cancelled.lock().unwrap().clone();
		assert_eq!(cancelled, vec![(2, Error::Closed.to_code())]);
	}

	#[tokio::test]
	async fn abort_cancels_queued() {
		let f = Fixture::new();
		f.queue.push(f.group(1));
		f.queue.push(f.group(2));
		f.queue.abort(Error::SubscribeCancelled);

		assert!(matches!(f.queue.pop().await, Err(Error::SubscribeCancelled)));

		let code = Error::SubscribeCancelled.to_code();
		let cancelled = f.cancelled.lock().unwrap().clone();
		assert_eq!(cancelled, vec![(1, code), (2, code)]);
	}

	#[tokio::test]
	async fn urgent_rank_sent_first() {
		use crate::scheduler::GroupScheduler;

		let scheduler = GroupScheduler::default();

		let (send, _recv) = crate::fake::stream();
		let urgent_spy = send.clone();
		let mut urgent = GroupWriter::new(Writer::new(send), 1, scheduler.insert(0));

		let (send, _recv) = crate::fake::stream();
		let background_spy = send.clone();
		let mut background = GroupWriter::new(Writer::new(send), 1, scheduler.insert(200));

		urgent.write_frame(&Frame::new(&b"a"[..])).await.unwrap();
		background.write_frame(&Frame::new(&b"b"[..])).await.unwrap();

		// The transport sends higher values first, so the most urgent rank
		// must get the highest stream priority.
		assert_eq!(urgent_spy.priority(), Some(u8::MAX));
		assert_eq!(background_spy.priority(), Some(u8::MAX - 1));
	}

	#[tokio::test]
	async fn pop_wakes_on_push() {
		let f = Fixture::new();
		let queue = f.queue.clone();

		let task = tokio::spawn(async move { queue.pop().await.unwrap().sequence });
		tokio::task::yield_now().await;

		f.queue.push(f.group(7));
		assert_eq!(task.await.unwrap(), 7);
	}
}
