use crate::coding::*;

/// The header written at the start of every group unidirectional stream,
/// after the stream type.
///
/// Unlike control messages there is no type/length framing; frames follow
/// immediately after the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Group {
	/// The subscription this group belongs to.
	pub subscribe_id: u64,

	/// The sequence number of the group, starting at 1.
	pub sequence: u64,
}

impl Encode for Group {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.subscribe_id.encode(w);
		self.sequence.encode(w);
	}
}

impl Decode for Group {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe_id: u64::decode(r)?,
			sequence: u64::decode(r)?,
		})
	}
}
