use std::collections::{hash_map, HashMap};

use bytes::Bytes;

use crate::coding::*;

/// Refuse to decode an absurd number of parameters.
const MAX_PARAMS: u64 = 64;

/// An unordered map of varint-keyed opaque values, used for extension
/// negotiation.
///
/// Unknown keys are preserved as-is; duplicate keys are a protocol violation.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
	entries: HashMap<u64, Bytes>,
}

impl Decode for Parameters {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let count = u64::decode(r)?;
		if count > MAX_PARAMS {
			return Err(DecodeError::TooMany);
		}

		let mut entries = HashMap::new();
		for _ in 0..count {
			let key = u64::decode(r)?;
			let value = Bytes::decode(r)?;

			match entries.entry(key) {
				hash_map::Entry::Occupied(_) => return Err(DecodeError::Duplicate),
				hash_map::Entry::Vacant(entry) => entry.insert(value),
			};
		}

		Ok(Self { entries })
	}
}

impl Encode for Parameters {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		self.entries.len().encode(w);

		for (key, value) in self.entries.iter() {
			key.encode(w);
			value.encode(w);
		}
	}
}

impl Parameters {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, key: u64) -> Option<&[u8]> {
		self.entries.get(&key).map(|v| v.as_ref())
	}

	pub fn set(&mut self, key: u64, value: impl Into<Bytes>) {
		self.entries.insert(key, value.into());
	}

	pub fn remove(&mut self, key: u64) -> Option<Bytes> {
		self.entries.remove(&key)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
