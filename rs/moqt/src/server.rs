use std::collections::HashMap;

use web_async::Lock;

use crate::{Error, Session, SessionMux, SessionOptions};

/// Accepts handshakes over established connections, sharing one mux across
/// every session so all of them serve the same broadcasts.
///
/// Listening is out of scope; the caller accepts QUIC or WebTransport
/// connections and hands them over.
pub struct Server<S: web_transport_trait::Session> {
	options: SessionOptions,
	mux: SessionMux<S>,
	state: Lock<ServerState<S>>,
}

struct ServerState<S: web_transport_trait::Session> {
	sessions: HashMap<u64, Session<S>>,
	next_id: u64,
}

impl<S: web_transport_trait::Session> Clone for Server<S> {
	fn clone(&self) -> Self {
		Self {
			options: self.options.clone(),
			mux: self.mux.clone(),
			state: self.state.clone(),
		}
	}
}

impl<S: web_transport_trait::Session> Server<S> {
	pub fn new(mux: SessionMux<S>, options: SessionOptions) -> Self {
		Self {
			options,
			mux,
			state: Lock::new(ServerState {
				sessions: HashMap::new(),
				next_id: 0,
			}),
		}
	}

	/// The mux shared by all accepted sessions.
	pub fn mux(&self) -> &SessionMux<S> {
		&self.mux
	}

	/// Perform the handshake over an established connection.
	///
	/// The session is tracked until it closes, so [Server::close] can shut
	/// down every active session.
	pub async fn accept(&self, session: S) -> Result<Session<S>, Error> {
		let session = Session::accept(session, self.mux.clone(), self.options.clone()).await?;

		let id = {
			let mut state = self.state.lock();
			let id = state.next_id;
			state.next_id += 1;
			state.sessions.insert(id, session.clone());
			id
		};

		let this = self.clone();
		let watch = session.clone();
		web_async::spawn(async move {
			watch.closed().await;
			this.state.lock().sessions.remove(&id);
		});

		Ok(session)
	}

	/// The number of sessions currently active.
	pub fn session_count(&self) -> usize {
		self.state.lock().sessions.len()
	}

	/// Close every active session with the given error.
	pub fn close(&self, err: Error) {
		let sessions = std::mem::take(&mut self.state.lock().sessions);
		for (_, session) in sessions {
			session.close(err.clone());
		}
	}
}
