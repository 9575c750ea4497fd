use crate::{Error, Session, SessionMux, SessionOptions};

/// Dials nothing itself; the caller establishes the QUIC or WebTransport
/// connection and hands it over for the handshake.
#[derive(Clone, Default)]
pub struct Client {
	options: SessionOptions,
}

impl Client {
	pub fn new(options: SessionOptions) -> Self {
		Self { options }
	}

	/// Perform the handshake over an established connection.
	///
	/// The mux serves any broadcasts the peer subscribes to; pass an empty one
	/// to act as a pure subscriber.
	pub async fn connect<S: web_transport_trait::Session>(
		&self,
		session: S,
		mux: SessionMux<S>,
	) -> Result<Session<S>, Error> {
		Session::connect(session, mux, self.options.clone()).await
	}
}
