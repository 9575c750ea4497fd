use std::collections::HashMap;

use web_async::Lock;

use crate::{path, Announcement, Error};

/// The subscriber-side state for one announce stream prefix.
///
/// Tracks the currently active suffixes and enforces the wire lifecycle: for
/// each suffix the stream must strictly alternate ACTIVE, ENDED, starting
/// with ACTIVE. Transport-free so the rules can be tested directly.
pub(crate) struct AnnounceMap {
	prefix: String,
	actives: HashMap<String, Announcement>,
	send: async_channel::Sender<Announcement>,
	closed: Option<Error>,
}

impl AnnounceMap {
	pub fn new(prefix: String, send: async_channel::Sender<Announcement>) -> Self {
		Self {
			prefix,
			actives: HashMap::new(),
			send,
			closed: None,
		}
	}

	/// Handle an ACTIVE for the given suffix.
	pub fn active(&mut self, suffix: &str) -> Result<(), Error> {
		if self.actives.contains_key(suffix) {
			return Err(Error::DuplicatedAnnounce);
		}

		let announcement = Announcement::new(path::join(&self.prefix, suffix));
		self.actives.insert(suffix.to_string(), announcement.clone());

		// Unbounded; only fails if the application dropped the reader.
		let _ = self.send.try_send(announcement);

		Ok(())
	}

	/// Handle an ENDED for the given suffix.
	pub fn ended(&mut self, suffix: &str) -> Result<(), Error> {
		// Ended-without-active is the same lifecycle violation as a
		// duplicated active, and uses the same code.
		let announcement = self.actives.remove(suffix).ok_or(Error::DuplicatedAnnounce)?;
		announcement.end();
		Ok(())
	}

	/// Tear down: end every active announcement and close the channel.
	pub fn close(&mut self, err: Error) {
		if self.closed.is_some() {
			return;
		}
		self.closed = Some(err);
		self.send.close();

		for (_, announcement) in self.actives.drain() {
			announcement.end();
		}
	}

	pub fn closed(&self) -> Option<Error> {
		self.closed.clone()
	}
}

/// Announcements received under a prefix, in wire order.
///
/// Returned by the session; the stream itself is pumped by a background task.
pub struct AnnouncedReader {
	prefix: String,
	recv: async_channel::Receiver<Announcement>,
	state: Lock<AnnounceMap>,
}

impl AnnouncedReader {
	pub(crate) fn new(prefix: String, recv: async_channel::Receiver<Announcement>, state: Lock<AnnounceMap>) -> Self {
		Self { prefix, recv, state }
	}

	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	/// The next announcement, blocking until one arrives.
	///
	/// After the stream fails or closes, every call returns the same error.
	pub async fn next(&mut self) -> Result<Announcement, Error> {
		match self.recv.recv().await {
			Ok(announcement) => Ok(announcement),
			Err(_) => Err(self.state.lock().closed().unwrap_or(Error::Closed)),
		}
	}
}
