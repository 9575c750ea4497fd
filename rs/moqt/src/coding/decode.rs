use std::string::FromUtf8Error;
use thiserror::Error;

/// Read the value from the buffer.
///
/// If [DecodeError::Short] is returned, the caller should try again with more data.
pub trait Decode: Sized {
	/// Decode the value from the given buffer.
	fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, DecodeError>;
}

/// A decode error.
#[derive(Error, Debug, Clone)]
pub enum DecodeError {
	#[error("short buffer")]
	Short,

	#[error("long message")]
	Long,

	#[error("invalid string")]
	InvalidString(#[from] FromUtf8Error),

	#[error("invalid message type: {0:?}")]
	InvalidMessage(u64),

	#[error("invalid value")]
	InvalidValue,

	#[error("too many")]
	TooMany,

	#[error("expected end")]
	ExpectedEnd,

	#[error("duplicate")]
	Duplicate,
}

impl Decode for u64 {
	/// Decode a QUIC varint; the top two bits of the first byte give the length.
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		if !r.has_remaining() {
			return Err(DecodeError::Short);
		}

		let first = r.chunk()[0];
		let size = 1usize << (first >> 6);
		if r.remaining() < size {
			return Err(DecodeError::Short);
		}

		Ok(match size {
			1 => r.get_u8() as u64,
			2 => (r.get_u16() & 0x3fff) as u64,
			4 => (r.get_u32() & 0x3fff_ffff) as u64,
			8 => r.get_u64() & 0x3fff_ffff_ffff_ffff,
			_ => unreachable!(),
		})
	}
}

impl Decode for usize {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(u64::decode(r)? as usize)
	}
}

impl Decode for u8 {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match r.has_remaining() {
			true => Ok(r.get_u8()),
			false => Err(DecodeError::Short),
		}
	}
}

impl Decode for String {
	/// Decode a string with a varint length prefix.
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let v = Vec::<u8>::decode(r)?;
		let str = String::from_utf8(v)?;

		Ok(str)
	}
}

impl Decode for Vec<u8> {
	fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, DecodeError> {
		let size = usize::decode(buf)?;

		if buf.remaining() < size {
			return Err(DecodeError::Short);
		}

		let bytes = buf.copy_to_bytes(size);
		Ok(bytes.to_vec())
	}
}

impl Decode for bytes::Bytes {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let len = usize::decode(r)?;
		if r.remaining() < len {
			return Err(DecodeError::Short);
		}
		let bytes = r.copy_to_bytes(len);
		Ok(bytes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn short_varint() {
		// A two-byte varint with only one byte available.
		let buf = [0b0100_0000u8];
		let mut cursor = std::io::Cursor::new(&buf[..]);
		assert!(matches!(u64::decode(&mut cursor), Err(DecodeError::Short)));
	}

	#[test]
	fn short_string() {
		// Length prefix says 5 bytes, only 2 present.
		let buf = [5u8, b'h', b'i'];
		let mut cursor = std::io::Cursor::new(&buf[..]);
		assert!(matches!(String::decode(&mut cursor), Err(DecodeError::Short)));
	}

	#[test]
	fn invalid_utf8() {
		let buf = [2u8, 0xff, 0xfe];
		let mut cursor = std::io::Cursor::new(&buf[..]);
		assert!(matches!(
			String::decode(&mut cursor),
			Err(DecodeError::InvalidString(_))
		));
	}
}
