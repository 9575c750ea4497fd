use std::sync::Arc;

use crate::coding::DecodeError;
use crate::message::Versions;

/// An error that can cross the wire, either closing a single stream or the
/// entire session.
pub trait SendSyncError: std::error::Error + Send + Sync {}
impl<T: std::error::Error + Send + Sync> SendSyncError for T {}

/// Every way a session, subscription, announcement, or group can fail.
///
/// Each variant maps to a wire error code via [Error::to_code]; codes are
/// grouped by the scope they terminate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
	/// The underlying transport failed.
	#[error("transport error: {0}")]
	Transport(Arc<dyn SendSyncError>),

	/// The peer sent bytes we couldn't parse.
	#[error("decode error: {0}")]
	Decode(#[from] DecodeError),

	/// No mutually supported version.
	#[error("unsupported versions: offered={0:?} supported={1:?}")]
	Version(Versions, Versions),

	/// The peer is not allowed to perform the operation.
	#[error("unauthorized")]
	Unauthorized,

	/// The peer violated the protocol.
	#[error("protocol violation")]
	ProtocolViolation,

	/// A stream started with an unknown stream type.
	#[error("invalid stream type: {0}")]
	InvalidStreamType(u64),

	/// An operation took too long.
	#[error("timeout")]
	Timeout,

	/// The session was closed locally.
	#[error("closed")]
	Closed,

	/// An unclassified local failure.
	#[error("internal error")]
	Internal,

	/// An announcement for the suffix is already active, or already ended.
	#[error("duplicate announcement")]
	DuplicatedAnnounce,

	/// An unclassified failure while serving announcements.
	#[error("internal announce error")]
	InternalAnnounce,

	/// The subscribe ID was already used.
	#[error("duplicate subscription")]
	DuplicatedSubscribe,

	/// A sequence range was malformed, or an update tried to widen one.
	#[error("invalid range")]
	InvalidRange,

	/// No broadcast or track matched the subscription.
	#[error("track not found")]
	TrackNotFound,

	/// The subscription was cancelled by the subscriber.
	#[error("subscribe cancelled")]
	SubscribeCancelled,

	/// The subscribe ID exceeds the advertised ceiling.
	#[error("too many subscriptions")]
	TooManySubscribes,

	/// An unclassified failure while serving a subscription.
	#[error("internal subscribe error")]
	InternalSubscribe,

	/// The group sequence falls outside the subscribed range, or the group
	/// was evicted before it could be read.
	#[error("group out of range")]
	OutOfRange,

	/// The group ended before all of its frames arrived.
	#[error("group expired")]
	GroupExpired,

	/// The group stream was dropped before it was finished.
	#[error("cancelled")]
	Cancel,

	/// An unclassified failure while relaying a group.
	#[error("internal group error")]
	InternalGroup,

	/// The peer closed with an error code we don't recognize.
	#[error("unknown error code: {0}")]
	Unknown(u32),
}

impl Error {
	/// The wire code used when closing a session or resetting a stream.
	///
	/// Codes 0x00-0x0f terminate the session, 0x10-0x1f an announce stream,
	/// 0x20-0x2f a subscribe stream, and 0x30-0x3f a group stream.
	pub fn to_code(&self) -> u32 {
		match self {
			Self::Closed => 0x00,
			Self::Internal | Self::Transport(_) => 0x01,
			Self::Unauthorized => 0x02,
			Self::ProtocolViolation | Self::Decode(_) => 0x03,
			Self::Version(..) => 0x04,
			Self::InvalidStreamType(_) => 0x05,
			Self::Timeout => 0x06,

			Self::InternalAnnounce => 0x10,
			Self::DuplicatedAnnounce => 0x11,

			Self::InternalSubscribe => 0x20,
			Self::InvalidRange => 0x21,
			Self::DuplicatedSubscribe => 0x22,
			Self::TrackNotFound => 0x23,
			Self::SubscribeCancelled => 0x24,
			Self::TooManySubscribes => 0x25,

			Self::InternalGroup => 0x30,
			Self::OutOfRange => 0x31,
			Self::GroupExpired => 0x32,
			Self::Cancel => 0x33,

			Self::Unknown(code) => *code,
		}
	}

	/// Classify a transport-level failure.
	///
	/// When the peer closed the session or reset the stream with an
	/// application code, recover the original error through
	/// [Error::from_code]; anything else stays wrapped as
	/// [Error::Transport].
	pub(crate) fn from_transport<E: web_transport_trait::Error>(err: E) -> Self {
		if let Some((code, _reason)) = err.session_error() {
			return Self::from_code(code);
		}
		if let Some(code) = err.stream_error() {
			return Self::from_code(code);
		}
		Self::Transport(Arc::new(err))
	}

	/// The inverse of [Error::to_code], for errors received from the peer.
	pub fn from_code(code: u32) -> Self {
		match code {
			0x00 => Self::Closed,
			0x01 => Self::Internal,
			0x02 => Self::Unauthorized,
			0x03 => Self::ProtocolViolation,
			0x04 => Self::Version(Default::default(), Default::default()),
			0x05 => Self::InvalidStreamType(0),
			0x06 => Self::Timeout,

			0x10 => Self::InternalAnnounce,
			0x11 => Self::DuplicatedAnnounce,

			0x20 => Self::InternalSubscribe,
			0x21 => Self::InvalidRange,
			0x22 => Self::DuplicatedSubscribe,
			0x23 => Self::TrackNotFound,
			0x24 => Self::SubscribeCancelled,
			0x25 => Self::TooManySubscribes,

			0x30 => Self::InternalGroup,
			0x31 => Self::OutOfRange,
			0x32 => Self::GroupExpired,
			0x33 => Self::Cancel,

			code => Self::Unknown(code),
		}
	}
}
