use crate::{coding::*, message::Message, Error};

/// A wrapper around a [web_transport_trait::SendStream] that will reset on Drop.
pub struct Writer<S: web_transport_trait::SendStream> {
	stream: Option<S>,
	buffer: bytes::BytesMut,
}

impl<S: web_transport_trait::SendStream> Writer<S> {
	pub fn new(stream: S) -> Self {
		Self {
			stream: Some(stream),
			buffer: Default::default(),
		}
	}

	/// Encode the given value to the stream.
	pub async fn encode<T: Encode>(&mut self, msg: &T) -> Result<(), Error> {
		self.buffer.clear();
		msg.encode(&mut self.buffer);
		self.flush().await
	}

	/// Encode the given framed message (type varint + length varint + payload).
	pub async fn encode_message<T: Message>(&mut self, msg: &T) -> Result<(), Error> {
		self.buffer.clear();
		msg.encode_framed(&mut self.buffer);

		tracing::trace!(kind = T::TYPE, message = ?msg, "sending message");
		self.flush().await
	}

	async fn flush(&mut self) -> Result<(), Error> {
		while !self.buffer.is_empty() {
			self.stream
				.as_mut()
				.unwrap()
				.write_buf(&mut self.buffer)
				.await
				.map_err(Error::from_transport)?;
		}

		Ok(())
	}

	/// Write the entire [bytes::Buf] to the stream.
	///
	/// NOTE: This can avoid performing a copy when using [bytes::Bytes].
	pub async fn write_all<B: bytes::Buf + Send>(&mut self, buf: &mut B) -> Result<(), Error> {
		while buf.has_remaining() {
			self.stream
				.as_mut()
				.unwrap()
				.write_buf(buf)
				.await
				.map_err(Error::from_transport)?;
		}
		Ok(())
	}

	/// Mark the stream as finished (clean FIN).
	pub fn finish(&mut self) -> Result<(), Error> {
		self.stream
			.as_mut()
			.unwrap()
			.finish()
			.map_err(Error::from_transport)
	}

	/// Abort the stream with the given error.
	pub fn abort(&mut self, err: &Error) {
		self.stream.as_mut().unwrap().reset(err.to_code());
	}

	/// Wait for the stream to be closed, or the [Self::finish] to be acknowledged by the peer.
	pub async fn closed(&mut self) -> Result<(), Error> {
		self.stream
			.as_mut()
			.unwrap()
			.closed()
			.await
			.map_err(Error::from_transport)?;
		Ok(())
	}

	/// Set the priority of the stream.
	pub fn set_priority(&mut self, priority: u8) {
		self.stream.as_mut().unwrap().set_priority(priority);
	}
}

impl<S: web_transport_trait::SendStream> Drop for Writer<S> {
	fn drop(&mut self) {
		if let Some(mut stream) = self.stream.take() {
			// Unlike the Quinn default, we abort the stream on drop.
			stream.reset(Error::Cancel.to_code());
		}
	}
}
