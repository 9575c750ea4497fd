use crate::coding::{Reader, Writer};
use crate::Error;

/// A [Writer] and [Reader] pair for a single bidirectional stream.
pub struct Stream<S: web_transport_trait::Session> {
	pub writer: Writer<S::SendStream>,
	pub reader: Reader<S::RecvStream>,
}

impl<S: web_transport_trait::Session> Stream<S> {
	/// Open a new bidirectional stream.
	pub async fn open(session: &S) -> Result<Self, Error> {
		let (send, recv) = session
			.open_bi()
			.await
			.map_err(Error::from_transport)?;

		Ok(Stream {
			writer: Writer::new(send),
			reader: Reader::new(recv),
		})
	}

	/// Accept the next bidirectional stream.
	pub async fn accept(session: &S) -> Result<Self, Error> {
		let (send, recv) = session
			.accept_bi()
			.await
			.map_err(Error::from_transport)?;

		Ok(Stream {
			writer: Writer::new(send),
			reader: Reader::new(recv),
		})
	}

	/// Abort both halves of the stream with the given error.
	pub fn abort(&mut self, err: &Error) {
		self.writer.abort(err);
		self.reader.abort(err);
	}
}
