use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
	coding::*,
	message::{Message, Parameters},
};

/// The delivery order requested for groups within a track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum GroupOrder {
	/// Let the publisher decide.
	#[default]
	Default = 0,
	Ascending = 1,
	Descending = 2,
}

impl Encode for GroupOrder {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		u8::from(*self).encode(w);
	}
}

impl Decode for GroupOrder {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		u8::decode(r)?.try_into().map_err(|_| DecodeError::InvalidValue)
	}
}

/// Sent by the subscriber to start a subscription on a new bidirectional
/// stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscribe {
	pub subscribe_id: u64,
	pub broadcast_path: String,
	pub track: String,
	pub priority: u8,
	pub group_order: GroupOrder,

	/// The first group of interest; 0 means no lower bound.
	pub min_group_sequence: u64,

	/// The last group of interest; 0 means no upper bound.
	pub max_group_sequence: u64,

	pub parameters: Parameters,
}

impl Message for Subscribe {
	const TYPE: u64 = 0x02;

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.subscribe_id.encode(w);
		self.broadcast_path.encode(w);
		self.track.encode(w);
		self.priority.encode(w);
		self.min_group_sequence.encode(w);
		self.max_group_sequence.encode(w);
		self.group_order.encode(w);
		self.parameters.encode(w);
	}

	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError> {
		let subscribe_id = u64::decode(r)?;
		let broadcast_path = String::decode(r)?;
		let track = String::decode(r)?;
		let priority = u8::decode(r)?;
		let min_group_sequence = u64::decode(r)?;
		let max_group_sequence = u64::decode(r)?;
		let group_order = GroupOrder::decode(r)?;
		let parameters = Parameters::decode(r)?;

		Ok(Self {
			subscribe_id,
			broadcast_path,
			track,
			priority,
			group_order,
			min_group_sequence,
			max_group_sequence,
			parameters,
		})
	}
}

/// Sent by the publisher to accept a [Subscribe].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeOk {
	pub group_order: GroupOrder,
	pub parameters: Parameters,
}

impl Message for SubscribeOk {
	const TYPE: u64 = 0x03;

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.group_order.encode(w);
		self.parameters.encode(w);
	}

	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			group_order: GroupOrder::decode(r)?,
			parameters: Parameters::decode(r)?,
		})
	}
}

/// Sent by the subscriber to adjust a live subscription.
///
/// A zero sequence bound means "leave unchanged"; a non-zero minimum may only
/// grow and a non-zero maximum may only shrink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeUpdate {
	pub priority: u8,
	pub min_group_sequence: u64,
	pub max_group_sequence: u64,
	pub parameters: Parameters,
}

impl Message for SubscribeUpdate {
	const TYPE: u64 = 0x04;

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.priority.encode(w);
		self.min_group_sequence.encode(w);
		self.max_group_sequence.encode(w);
		self.parameters.encode(w);
	}

	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			priority: u8::decode(r)?,
			min_group_sequence: u64::decode(r)?,
			max_group_sequence: u64::decode(r)?,
			parameters: Parameters::decode(r)?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::tests::{round_trip, truncated};

	#[test]
	fn subscribe() {
		let msg = Subscribe {
			subscribe_id: 7,
			broadcast_path: "/live/alice".to_string(),
			track: "video".to_string(),
			priority: 128,
			group_order: GroupOrder::Descending,
			min_group_sequence: 100,
			max_group_sequence: 0,
			parameters: Parameters::new(),
		};
		assert_eq!(round_trip(&msg), msg);
		truncated(&msg);
	}

	#[test]
	fn subscribe_ok() {
		let msg = SubscribeOk {
			group_order: GroupOrder::Ascending,
			parameters: Parameters::new(),
		};
		assert_eq!(round_trip(&msg), msg);
		truncated(&msg);
	}

	#[test]
	fn subscribe_update() {
		let msg = SubscribeUpdate {
			priority: 5,
			min_group_sequence: 200,
			max_group_sequence: 300,
			parameters: Parameters::new(),
		};
		assert_eq!(round_trip(&msg), msg);
		truncated(&msg);
	}

	#[test]
	fn bad_group_order() {
		let mut buf = bytes::BytesMut::new();
		9u64.encode(&mut buf);

		let mut cursor = std::io::Cursor::new(&buf[..]);
		assert!(matches!(
			GroupOrder::decode(&mut cursor),
			Err(DecodeError::InvalidValue)
		));
	}
}
