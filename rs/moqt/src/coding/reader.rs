use std::{cmp, io};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{coding::*, message::Message, Error};

/// A reader for decoding values and framed messages from a stream.
pub struct Reader<S: web_transport_trait::RecvStream> {
	stream: S,
	buffer: BytesMut,
}

impl<S: web_transport_trait::RecvStream> Reader<S> {
	pub fn new(stream: S) -> Self {
		Self {
			stream,
			buffer: Default::default(),
		}
	}

	/// Decode the next value from the stream.
	pub async fn decode<T: Decode>(&mut self) -> Result<T, Error> {
		loop {
			let mut cursor = io::Cursor::new(&self.buffer);
			match T::decode(&mut cursor) {
				Ok(msg) => {
					self.buffer.advance(cursor.position() as usize);
					return Ok(msg);
				}
				Err(DecodeError::Short) => self.fill().await?,
				Err(e) => return Err(Error::Decode(e)),
			}
		}
	}

	/// Decode the next value unless the stream is closed.
	pub async fn decode_maybe<T: Decode>(&mut self) -> Result<Option<T>, Error> {
		match self.closed().await {
			Ok(()) => Ok(None),
			Err(Error::Decode(DecodeError::ExpectedEnd)) => Ok(Some(self.decode().await?)),
			Err(e) => Err(e),
		}
	}

	/// Decode the next framed message (type varint + length varint + payload).
	pub async fn decode_message<T: Message>(&mut self) -> Result<T, Error> {
		loop {
			match Self::decode_framed::<T>(&self.buffer) {
				Ok((msg, consumed)) => {
					self.buffer.advance(consumed);
					tracing::trace!(kind = T::TYPE, message = ?msg, "received message");
					return Ok(msg);
				}
				Err(DecodeError::Short) => self.fill().await?,
				Err(e) => return Err(Error::Decode(e)),
			}
		}
	}

	/// Decode the next framed message unless the stream is closed.
	pub async fn decode_message_maybe<T: Message>(&mut self) -> Result<Option<T>, Error> {
		match self.closed().await {
			Ok(()) => Ok(None),
			Err(Error::Decode(DecodeError::ExpectedEnd)) => Ok(Some(self.decode_message().await?)),
			Err(e) => Err(e),
		}
	}

	fn decode_framed<T: Message>(buffer: &BytesMut) -> Result<(T, usize), DecodeError> {
		let mut cursor = io::Cursor::new(&buffer[..]);
		let kind = u64::decode(&mut cursor)?;
		if kind != T::TYPE {
			return Err(DecodeError::InvalidMessage(kind));
		}

		let size = usize::decode(&mut cursor)?;
		let start = cursor.position() as usize;
		if buffer.len() < start + size {
			return Err(DecodeError::Short);
		}

		let mut payload = io::Cursor::new(&buffer[start..start + size]);
		// The payload is length-delimited, so a Short here means a malformed message.
		let msg = T::decode_msg(&mut payload).map_err(|e| match e {
			DecodeError::Short => DecodeError::Long,
			e => e,
		})?;

		if payload.has_remaining() {
			return Err(DecodeError::Long);
		}

		Ok((msg, start + size))
	}

	async fn fill(&mut self) -> Result<(), Error> {
		if self
			.stream
			.read_buf(&mut self.buffer)
			.await
			.map_err(Error::from_transport)?
			.is_none()
		{
			// Stream closed while we still need more data.
			return Err(Error::Decode(DecodeError::Short));
		}

		Ok(())
	}

	/// Returns a non-zero chunk of data, or None if the stream is closed.
	pub async fn read(&mut self, max: usize) -> Result<Option<Bytes>, Error> {
		if !self.buffer.is_empty() {
			let size = cmp::min(max, self.buffer.len());
			let data = self.buffer.split_to(size).freeze();
			return Ok(Some(data));
		}

		self.stream
			.read_chunk(max)
			.await
			.map_err(Error::from_transport)
	}

	/// Read exactly the given number of bytes from the stream.
	pub async fn read_exact(&mut self, size: usize) -> Result<Bytes, Error> {
		// An optimization to avoid a copy if we have enough data in the buffer.
		if self.buffer.len() >= size {
			return Ok(self.buffer.split_to(size).freeze());
		}

		let data = BytesMut::with_capacity(size.min(u16::MAX as usize));
		let mut buf = data.limit(size);

		let size = cmp::min(buf.remaining_mut(), self.buffer.len());
		let data = self.buffer.split_to(size);
		buf.put(data);

		while buf.has_remaining_mut() {
			if self
				.stream
				.read_buf(&mut buf)
				.await
				.map_err(Error::from_transport)?
				.is_none()
			{
				return Err(Error::Decode(DecodeError::Short));
			}
		}

		Ok(buf.into_inner().freeze())
	}

	/// Wait until the stream is closed, erroring if there are any additional bytes.
	pub async fn closed(&mut self) -> Result<(), Error> {
		if self.buffer.is_empty()
			&& self
				.stream
				.read_buf(&mut self.buffer)
				.await
				.map_err(Error::from_transport)?
				.is_none()
		{
			return Ok(());
		}

		Err(DecodeError::ExpectedEnd.into())
	}

	/// Abort the read side of the stream with the given error.
	pub fn abort(&mut self, err: &Error) {
		self.stream.stop(err.to_code());
	}
}
