use std::fmt;

use bytes::Bytes;

use crate::coding::*;

/// An opaque payload within a group.
///
/// The wire form is a length varint followed by the payload bytes. The frame's
/// position within its group stream is its implicit sequence number.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Frame {
	payload: Bytes,
}

impl Frame {
	pub fn new(payload: impl Into<Bytes>) -> Self {
		Self {
			payload: payload.into(),
		}
	}

	pub fn payload(&self) -> &[u8] {
		&self.payload
	}

	pub fn into_payload(self) -> Bytes {
		self.payload
	}

	pub fn len(&self) -> usize {
		self.payload.len()
	}

	pub fn is_empty(&self) -> bool {
		self.payload.is_empty()
	}

	/// Clear the payload so the frame can be reused.
	pub fn reset(&mut self) {
		self.payload = Bytes::new();
	}
}

impl Encode for Frame {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.payload.encode(w);
	}
}

impl Decode for Frame {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			payload: Bytes::decode(r)?,
		})
	}
}

impl fmt::Debug for Frame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// Only show the first few bytes; payloads can be huge.
		const MAX: usize = 16;
		let trunc = &self.payload[..self.payload.len().min(MAX)];
		write!(f, "Frame(len={} hex={}", self.payload.len(), hex::encode(trunc))?;
		if self.payload.len() > MAX {
			write!(f, "..")?;
		}
		write!(f, ")")
	}
}
