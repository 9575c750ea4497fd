//! The wire messages for the MOQ Lite profile.
//!
//! Every control message is framed as `{type varint, length varint, payload}`.
//! The GROUP header and FRAME are exceptions: the uni-stream type prefix
//! identifies the GROUP header, and frames are bare `{length, payload}`.

mod announce;
mod group;
mod parameters;
mod session;
mod stream_type;
mod subscribe;
mod version;

pub use announce::*;
pub use group::*;
pub use parameters::*;
pub use session::*;
pub use stream_type::*;
pub use subscribe::*;
pub use version::*;

use crate::coding::{DecodeError, Encode};

/// A framed control message with a registered type id.
pub trait Message: Sized + std::fmt::Debug {
	/// The message type id, sent on the wire before the payload length.
	const TYPE: u64;

	/// Encode the message payload (without the type/length prefix).
	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W);

	/// Decode the message payload (without the type/length prefix).
	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError>;

	/// Encode the full frame: type varint, length varint, then the payload.
	fn encode_framed<W: bytes::BufMut>(&self, w: &mut W) {
		Self::TYPE.encode(w);

		let mut payload = bytes::BytesMut::new();
		self.encode_msg(&mut payload);
		payload.len().encode(w);
		w.put(payload);
	}
}
