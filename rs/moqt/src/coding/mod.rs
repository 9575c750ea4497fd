//! Wire encoding primitives: QUIC varints, length-prefixed values, and
//! buffered stream readers/writers.

mod decode;
mod encode;
mod reader;
mod stream;
mod writer;

pub use decode::*;
pub use encode::*;
pub use reader::*;
pub use stream::*;
pub use writer::*;

/// The largest value representable as a QUIC varint: 2^62 - 1.
pub const VARINT_MAX: u64 = (1 << 62) - 1;
