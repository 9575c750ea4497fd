use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::coding::*;

/// The first varint on every new bidirectional stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u64)]
pub enum BiStreamType {
	Session = 0,
	Announce = 1,
	Subscribe = 2,
}

/// The first varint on every new unidirectional stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u64)]
pub enum UniStreamType {
	Group = 0,
}

impl Encode for BiStreamType {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		u64::from(*self).encode(w);
	}
}

impl Encode for UniStreamType {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		u64::from(*self).encode(w);
	}
}

// Unknown stream types are reported with the offending value so the session
// can cancel the stream with InvalidStreamType.

impl Decode for BiStreamType {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let v = u64::decode(r)?;
		v.try_into().map_err(|_| DecodeError::InvalidMessage(v))
	}
}

impl Decode for UniStreamType {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let v = u64::decode(r)?;
		v.try_into().map_err(|_| DecodeError::InvalidMessage(v))
	}
}
