use crate::{
	coding::{Decode, DecodeError, Encode},
	message::{Message, Parameters, Version, Versions},
};

/// Sent by the client on the session stream to start the handshake.
#[derive(Clone, Debug)]
pub struct SessionClient {
	pub versions: Versions,
	pub parameters: Parameters,
}

impl Message for SessionClient {
	const TYPE: u64 = 0x20;

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.versions.encode(w);
		self.parameters.encode(w);
	}

	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			versions: Versions::decode(r)?,
			parameters: Parameters::decode(r)?,
		})
	}
}

/// Sent by the server in response to [SessionClient], selecting a version.
#[derive(Clone, Debug)]
pub struct SessionServer {
	pub version: Version,
	pub parameters: Parameters,
}

impl Message for SessionServer {
	const TYPE: u64 = 0x21;

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.version.encode(w);
		self.parameters.encode(w);
	}

	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			version: Version::decode(r)?,
			parameters: Parameters::decode(r)?,
		})
	}
}

/// Sent by either side to advertise an advisory send-rate ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionUpdate {
	pub bitrate: u64,
}

impl Message for SessionUpdate {
	const TYPE: u64 = 0x22;

	fn encode_msg<W: bytes::BufMut>(&self, w: &mut W) {
		self.bitrate.encode(w);
	}

	fn decode_msg<B: bytes::Buf>(r: &mut B) -> Result<Self, DecodeError> {
		Ok(Self {
			bitrate: u64::decode(r)?,
		})
	}
}
