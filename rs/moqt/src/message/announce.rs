use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
	coding::*,
	message::Message,
};

/// Sent by the subscriber to request announcements under a prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnouncePlease {
	/// Announce broadcasts with this prefix; must start and end with "/".
	pub prefix: String,
}

impl Message for AnnouncePlease {
	const TYPE: u64 = 0x10;

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.prefix.encode(w);
	}

	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			prefix: String::decode(r)?,
		})
	}
}

/// Sent by the publisher after [AnnouncePlease]: the initial snapshot of
/// active suffixes under the prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnounceInit {
	pub suffixes: Vec<String>,
}

impl Message for AnnounceInit {
	const TYPE: u64 = 0x11;

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.suffixes.len().encode(w);
		for suffix in &self.suffixes {
			suffix.encode(w);
		}
	}

	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError> {
		let count = u64::decode(r)?;

		// Don't allocate more than 1024 elements upfront.
		let mut suffixes = Vec::with_capacity(count.min(1024) as usize);
		for _ in 0..count {
			suffixes.push(String::decode(r)?);
		}

		Ok(Self { suffixes })
	}
}

/// The lifecycle status carried by an [Announce] message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AnnounceStatus {
	Active = 1,
	Ended = 2,
}

impl Encode for AnnounceStatus {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		u64::from(u8::from(*self)).encode(w);
	}
}

impl Decode for AnnounceStatus {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let status = u64::decode(r)?;
		u8::try_from(status)
			.ok()
			.and_then(|s| s.try_into().ok())
			.ok_or(DecodeError::InvalidValue)
	}
}

/// Sent by the publisher when a broadcast under the prefix starts or ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Announce {
	pub status: AnnounceStatus,
	pub suffix: String,
}

impl Message for Announce {
	const TYPE: u64 = 0x12;

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.status.encode(w);
		self.suffix.encode(w);
	}

	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			status: AnnounceStatus::decode(r)?,
			suffix: String::decode(r)?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::tests::{round_trip, truncated};

	#[test]
	fn announce_please() {
		let msg = AnnouncePlease {
			prefix: "/live/".to_string(),
		};
		assert_eq!(round_trip(&msg), msg);
		truncated(&msg);
	}

	#[test]
	fn announce_init() {
		let msg = AnnounceInit {
			suffixes: vec!["alice".to_string(), "bob/camera".to_string()],
		};
		assert_eq!(round_trip(&msg), msg);
		truncated(&msg);
	}

	#[test]
	fn announce() {
		for status in [AnnounceStatus::Active, AnnounceStatus::Ended] {
			let msg = Announce {
				status,
				suffix: "stream1".to_string(),
			};
			assert_eq!(round_trip(&msg), msg);
		}
	}

	#[test]
	fn announce_bad_status() {
		let mut buf = bytes::BytesMut::new();
		3u64.encode(&mut buf);
		"x".encode(&mut buf);

		let mut cursor = std::io::Cursor::new(&buf[..]);
		assert!(matches!(
			Announce::decode_msg(&mut cursor),
			Err(DecodeError::InvalidValue)
		));
	}
}
