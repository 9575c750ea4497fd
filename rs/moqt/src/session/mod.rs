use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use web_async::Lock;

use crate::{
	announced::{AnnounceMap, AnnouncedReader},
	coding::{DecodeError, Reader, Stream, Writer},
	group::{GroupQueue, GroupReader},
	message::{self, Message},
	path,
	scheduler::GroupScheduler,
	setup::{self, SessionOptions},
	track::{TrackConfig, TrackReader},
	Error,
};

mod publisher;
pub use publisher::*;

/// A MOQ session bound to a single QUIC (or WebTransport) connection.
///
/// Created via [Session::connect] or [Session::accept]; the connection itself
/// is established externally. Clones share the same session.
pub struct Session<S: web_transport_trait::Session> {
	session: S,
	mux: SessionMux<S>,
	options: SessionOptions,
	scheduler: GroupScheduler,
	state: Lock<State<S>>,

	// Serialized writes to the session stream.
	control: mpsc::UnboundedSender<Vec<u8>>,
}

impl<S: web_transport_trait::Session> Clone for Session<S> {
	fn clone(&self) -> Self {
		Self {
			session: self.session.clone(),
			mux: self.mux.clone(),
			options: self.options.clone(),
			scheduler: self.scheduler.clone(),
			state: self.state.clone(),
			control: self.control.clone(),
		}
	}
}

struct State<S: web_transport_trait::Session> {
	// Local subscriptions, used to route incoming group streams.
	subscribes: HashMap<u64, SubscribeState<S>>,
	next_subscribe_id: u64,

	// Subscribe IDs accepted as publisher; each may be used once.
	accepted: HashSet<u64>,

	remote_bitrate: Option<u64>,

	// The fatal error, once terminated; all API calls fail fast with it.
	closed: Option<Error>,
}

struct SubscribeState<S: web_transport_trait::Session> {
	queue: GroupQueue<GroupReader<S::RecvStream>>,
	config: Lock<TrackConfig>,
}

impl<S: web_transport_trait::Session> Clone for SubscribeState<S> {
	fn clone(&self) -> Self {
		Self {
			queue: self.queue.clone(),
			config: self.config.clone(),
		}
	}
}

impl<S: web_transport_trait::Session> Default for State<S> {
	fn default() -> Self {
		Self {
			subscribes: HashMap::new(),
			next_subscribe_id: 0,
			accepted: HashSet::new(),
			remote_bitrate: None,
			closed: None,
		}
	}
}

impl<S: web_transport_trait::Session> State<S> {
	/// Claim an incoming subscribe ID.
	///
	/// Subscriptions arrive on independent streams, so IDs may be observed
	/// in any order; only reuse is an error.
	fn accept_subscribe(&mut self, id: u64, max: Option<u64>) -> Result<(), Error> {
		if let Some(max) = max {
			if id >= max {
				return Err(Error::TooManySubscribes);
			}
		}

		if !self.accepted.insert(id) {
			return Err(Error::DuplicatedSubscribe);
		}

		Ok(())
	}
}

impl<S: web_transport_trait::Session> Session<S> {
	/// Perform the handshake as a client and start the session.
	pub async fn connect(session: S, mux: SessionMux<S>, options: SessionOptions) -> Result<Self, Error> {
		let mut stream = Stream::open(&session).await?;
		stream.writer.encode(&message::BiStreamType::Session).await?;

		match setup::connect(&mut stream, &options).await {
			Ok(_) => {}
			Err(err) => {
				stream.abort(&err);
				session.close(err.to_code(), &err.to_string());
				return Err(err);
			}
		}

		Ok(Self::start(session, mux, options, stream))
	}

	/// Accept the handshake as a server and start the session.
	pub async fn accept(session: S, mux: SessionMux<S>, options: SessionOptions) -> Result<Self, Error> {
		let mut stream = Stream::accept(&session).await?;

		let res = async {
			match stream.reader.decode::<message::BiStreamType>().await {
				Ok(message::BiStreamType::Session) => {}
				Ok(_) => return Err(Error::ProtocolViolation),
				Err(Error::Decode(DecodeError::InvalidMessage(v))) => return Err(Error::InvalidStreamType(v)),
				Err(err) => return Err(err),
			}

			setup::accept(&mut stream, &options).await
		}
		.await;

		match res {
			Ok(_) => Ok(Self::start(session, mux, options, stream)),
			Err(err) => {
				stream.abort(&err);
				session.close(err.to_code(), &err.to_string());
				Err(err)
			}
		}
	}

	fn start(session: S, mux: SessionMux<S>, options: SessionOptions, stream: Stream<S>) -> Self {
		let (control, control_rx) = mpsc::unbounded_channel();

		let this = Self {
			session,
			mux,
			options,
			scheduler: GroupScheduler::default(),
			state: Lock::new(State::default()),
			control,
		};

		let run = this.clone();
		web_async::spawn(async move { run.run(stream, control_rx).await });

		this
	}

	async fn run(self, stream: Stream<S>, control_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
		let Stream { writer, reader } = stream;

		let res = tokio::select! {
			res = self.clone().run_session(reader) => res,
			res = Self::run_control(writer, control_rx) => res,
			res = self.clone().run_bi() => res,
			res = self.clone().run_uni() => res,
		};

		self.terminate(res.err().unwrap_or(Error::Closed));
	}

	/// Read SESSION_UPDATE messages until the session stream ends.
	async fn run_session(self, mut reader: Reader<S::RecvStream>) -> Result<(), Error> {
		while let Some(update) = reader.decode_message_maybe::<message::SessionUpdate>().await? {
			tracing::debug!(bitrate = update.bitrate, "remote bitrate updated");
			self.state.lock().remote_bitrate = Some(update.bitrate);
		}

		// The peer closed the session stream; the session is over.
		Ok(())
	}

	/// Flush queued control messages to the session stream.
	async fn run_control(
		mut writer: Writer<S::SendStream>,
		mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
	) -> Result<(), Error> {
		while let Some(buf) = rx.recv().await {
			writer.write_all(&mut std::io::Cursor::new(buf)).await?;
		}

		Ok(())
	}

	/// Accept incoming bi-streams and dispatch on their type prefix.
	async fn run_bi(self) -> Result<(), Error> {
		loop {
			let stream = Stream::accept(&self.session).await?;
			let this = self.clone();
			web_async::spawn(async move { this.serve_bi(stream).await });
		}
	}

	async fn serve_bi(self, mut stream: Stream<S>) {
		let typ = match stream.reader.decode::<message::BiStreamType>().await {
			Ok(typ) => typ,
			Err(err) => {
				let err = match err {
					Error::Decode(DecodeError::InvalidMessage(v)) => Error::InvalidStreamType(v),
					err => err,
				};
				tracing::debug!(%err, "rejected bi stream");
				stream.abort(&err);
				return;
			}
		};

		match typ {
			// There is exactly one session stream, opened during setup.
			message::BiStreamType::Session => stream.abort(&Error::ProtocolViolation),
			message::BiStreamType::Announce => self.serve_announce(stream).await,
			message::BiStreamType::Subscribe => self.serve_subscribe(stream).await,
		}
	}

	/// Accept incoming uni-streams and route groups to their subscription.
	async fn run_uni(self) -> Result<(), Error> {
		loop {
			let stream = self.session.accept_uni().await.map_err(Error::from_transport)?;

			let this = self.clone();
			web_async::spawn(async move { this.serve_group(Reader::new(stream)).await });
		}
	}

	async fn serve_group(self, mut reader: Reader<S::RecvStream>) {
		match reader.decode::<message::UniStreamType>().await {
			Ok(message::UniStreamType::Group) => {}
			Err(Error::Decode(DecodeError::InvalidMessage(v))) => {
				tracing::debug!(kind = v, "rejected uni stream");
				return reader.abort(&Error::InvalidStreamType(v));
			}
			Err(_) => return,
		}

		let header = match reader.decode::<message::Group>().await {
			Ok(header) => header,
			Err(err) => return reader.abort(&err),
		};

		if header.sequence == 0 {
			return reader.abort(&Error::OutOfRange);
		}

		let subscribe = self.state.lock().subscribes.get(&header.subscribe_id).cloned();

		let Some(subscribe) = subscribe else {
			// Unknown subscription; cancel the group but keep the session.
			tracing::warn!(id = header.subscribe_id, "group for unknown subscription");
			return reader.abort(&Error::InternalGroup);
		};

		if !subscribe.config.lock().in_range(header.sequence) {
			return reader.abort(&Error::OutOfRange);
		}

		tracing::trace!(id = header.subscribe_id, sequence = header.sequence, "group accepted");
		subscribe.queue.push(GroupReader::new(reader, header));
	}

	/// Subscribe to a track, returning once the publisher accepts.
	pub async fn subscribe(&self, broadcast: &str, track: &str, config: TrackConfig) -> Result<TrackReader<S>, Error> {
		if !path::is_valid(broadcast) {
			return Err(Error::ProtocolViolation);
		}
		config.validate()?;

		let id = {
			let mut state = self.state.lock();
			if let Some(err) = &state.closed {
				return Err(err.clone());
			}

			if let Some(max) = self.options.max_subscribe_id {
				if state.next_subscribe_id >= max {
					return Err(Error::TooManySubscribes);
				}
			}

			let id = state.next_subscribe_id;
			state.next_subscribe_id += 1;
			id
		};

		let mut stream = Stream::open(&self.session).await?;
		stream.writer.encode(&message::BiStreamType::Subscribe).await?;
		stream
			.writer
			.encode_message(&message::Subscribe {
				subscribe_id: id,
				broadcast_path: broadcast.to_string(),
				track: track.to_string(),
				priority: config.priority,
				group_order: config.group_order,
				min_group_sequence: config.min_group_sequence,
				max_group_sequence: config.max_group_sequence,
				parameters: config.parameters.clone(),
			})
			.await?;

		// Register before the OK arrives so early groups can be routed.
		let queue = GroupQueue::new();
		let shared = Lock::new(config);
		self.state.lock().subscribes.insert(
			id,
			SubscribeState {
				queue: queue.clone(),
				config: shared.clone(),
			},
		);

		let ok = match stream.reader.decode_message::<message::SubscribeOk>().await {
			Ok(ok) => ok,
			Err(err) => {
				self.state.lock().subscribes.remove(&id);
				stream.abort(&err);
				return Err(err);
			}
		};

		if ok.group_order != message::GroupOrder::Default {
			shared.lock().group_order = ok.group_order;
		}

		tracing::debug!(id, broadcast, track, "subscribed");

		// Watch the read half: a clean FIN means no more groups, a reset
		// carries the publisher's error.
		let mut reader = stream.reader;
		let watch_queue = queue.clone();
		let this = self.clone();
		web_async::spawn(async move {
			match reader.closed().await {
				Ok(()) => watch_queue.close(Error::Closed),
				Err(err) => watch_queue.abort(err),
			}
			this.state.lock().subscribes.remove(&id);
		});

		Ok(TrackReader::new(
			id,
			broadcast.to_string(),
			track.to_string(),
			shared,
			queue,
			stream.writer,
		))
	}

	/// Receive announcements for broadcasts under the given prefix.
	pub async fn announced(&self, prefix: &str) -> Result<AnnouncedReader, Error> {
		if !path::is_valid_prefix(prefix) {
			return Err(Error::ProtocolViolation);
		}

		if let Some(err) = self.state.lock().closed.clone() {
			return Err(err);
		}

		let mut stream = Stream::open(&self.session).await?;
		stream.writer.encode(&message::BiStreamType::Announce).await?;
		stream
			.writer
			.encode_message(&message::AnnouncePlease {
				prefix: prefix.to_string(),
			})
			.await?;

		let (tx, rx) = async_channel::unbounded();
		let state = Lock::new(AnnounceMap::new(prefix.to_string(), tx));
		let reader = AnnouncedReader::new(prefix.to_string(), rx, state.clone());

		let prefix = prefix.to_string();
		web_async::spawn(async move {
			let res = Self::run_announced(&mut stream, &state).await;

			let err = match res {
				Ok(()) => Error::Closed,
				Err(err) => {
					stream.abort(&err);
					err
				}
			};

			tracing::debug!(%prefix, %err, "announce stream finished");
			state.lock().close(err);
		});

		Ok(reader)
	}

	async fn run_announced(stream: &mut Stream<S>, state: &Lock<AnnounceMap>) -> Result<(), Error> {
		let init: message::AnnounceInit = stream.reader.decode_message().await?;
		{
			let mut map = state.lock();
			for suffix in &init.suffixes {
				map.active(suffix)?;
			}
		}

		while let Some(announce) = stream.reader.decode_message_maybe::<message::Announce>().await? {
			let mut map = state.lock();
			match announce.status {
				message::AnnounceStatus::Active => map.active(&announce.suffix)?,
				message::AnnounceStatus::Ended => map.ended(&announce.suffix)?,
			}
		}

		Ok(())
	}

	/// Advertise an advisory send-rate ceiling to the peer.
	pub fn update_bitrate(&self, bitrate: u64) -> Result<(), Error> {
		if let Some(err) = self.state.lock().closed.clone() {
			return Err(err);
		}

		let msg = message::SessionUpdate { bitrate };
		tracing::trace!(kind = message::SessionUpdate::TYPE, message = ?msg, "sending message");

		let mut buf = Vec::new();
		msg.encode_framed(&mut buf);
		self.control.send(buf).map_err(|_| Error::Closed)
	}

	/// The most recent bitrate advertised by the peer, if any.
	pub fn remote_bitrate(&self) -> Option<u64> {
		self.state.lock().remote_bitrate
	}

	/// Close the session and cancel all child streams.
	pub fn close(&self, err: Error) {
		self.terminate(err);
	}

	/// Wait until the session is closed, returning the cause.
	pub async fn closed(&self) -> Error {
		let err = self.session.closed().await;
		self.state
			.lock()
			.closed
			.clone()
			.unwrap_or_else(|| Error::from_transport(err))
	}

	fn terminate(&self, err: Error) {
		let subscribes = {
			let mut state = self.state.lock();
			if state.closed.is_some() {
				return;
			}
			state.closed = Some(err.clone());
			std::mem::take(&mut state.subscribes)
		};

		tracing::debug!(%err, "session terminated");

		for (_, subscribe) in subscribes {
			subscribe.queue.abort(err.clone());
		}

		self.session.close(err.to_code(), &err.to_string());
	}
}

#[cfg(test)]
mod tests {
	use std::{sync::Arc, time::Duration};

	use web_transport_trait::Session as _;

	use super::*;
	use crate::{fake, track::TrackWriter, Announcement, Frame};

	type FakeMux = SessionMux<fake::FakeSession>;
	type FakeSession = Session<fake::FakeSession>;

	/// Handshake two sessions over an in-memory connection, serving the given
	/// handlers on the second one.
	async fn establish(mux: FakeMux) -> (FakeSession, FakeSession, fake::FakeSession, fake::FakeSession) {
		let (client_transport, server_transport) = fake::pair();

		let (client, server) = tokio::try_join!(
			Session::connect(client_transport.clone(), FakeMux::new(), SessionOptions::default()),
			Session::accept(server_transport.clone(), mux, SessionOptions::default()),
		)
		.unwrap();

		(client, server, client_transport, server_transport)
	}

	/// Spin until the condition holds, bounded by a deadline.
	async fn eventually(mut condition: impl FnMut() -> bool) {
		tokio::time::timeout(Duration::from_secs(5), async {
			while !condition() {
				tokio::task::yield_now().await;
			}
		})
		.await
		.expect("condition never held");
	}

	#[tokio::test]
	async fn handshake() {
		let (client, server, transport, _keep) = establish(FakeMux::new()).await;

		client.update_bitrate(42_000).unwrap();
		eventually(|| server.remote_bitrate() == Some(42_000)).await;

		assert!(transport.close_code().is_none());
	}

	#[tokio::test]
	async fn publish_subscribe() {
		let mux = FakeMux::new();
		let handler: Arc<dyn TrackHandler<fake::FakeSession>> = Arc::new(|mut track: TrackWriter<fake::FakeSession>| {
			web_async::spawn(async move {
				let mut group = track.open_group(1).await.unwrap();
				group.write_frame(&Frame::new(&b"hello"[..])).await.unwrap();
				group.finish().unwrap();

				// Hold the subscription open until the subscriber is done.
				track.closed().await;
			});
		});
		mux.publish("/room/alice", handler).unwrap();

		let (client, _server, _ct, _st) = establish(mux).await;

		let mut track = client
			.subscribe("/room/alice", "video", TrackConfig::default())
			.await
			.unwrap();

		// The publisher resolves our deferred group order.
		assert_eq!(track.config().group_order, message::GroupOrder::Descending);

		let mut group = track.accept_group().await.unwrap();
		assert_eq!(group.sequence(), 1);

		let frame = group.read_frame().await.unwrap().unwrap();
		assert_eq!(frame.payload(), b"hello");
		assert!(group.read_frame().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn subscribe_not_found() {
		let (client, _server, transport, _st) = establish(FakeMux::new()).await;

		let err = client
			.subscribe("/room/nobody", "video", TrackConfig::default())
			.await
			.unwrap_err();
		assert!(matches!(err, Error::TrackNotFound));

		// A failed subscription does not end the session.
		assert!(transport.close_code().is_none());
	}

	#[tokio::test]
	async fn announce_discovery() {
		let mux = FakeMux::new();
		let (client, _server, _ct, _st) = establish(mux.clone()).await;

		let mut announced = client.announced("/live/").await.unwrap();

		let handler: Arc<dyn TrackHandler<fake::FakeSession>> = Arc::new(|_track: TrackWriter<fake::FakeSession>| {});
		let announcement = Announcement::new("/live/alice");
		mux.announce(announcement.clone(), handler).unwrap();

		let got = announced.next().await.unwrap();
		assert_eq!(got.path(), "/live/alice");
		assert!(got.is_active());

		announcement.end();
		got.ended().await;
	}

	#[tokio::test]
	async fn unknown_subscription_group() {
		let (client, _server, client_transport, server_transport) = establish(FakeMux::new()).await;

		// A group for a subscription that was never made.
		let send = server_transport.open_uni().await.unwrap();
		let spy = send.clone();
		let mut writer = Writer::new(send);
		writer.encode(&message::UniStreamType::Group).await.unwrap();
		writer
			.encode(&message::Group {
				subscribe_id: 9,
				sequence: 1,
			})
			.await
			.unwrap();

		// The group stream is cancelled...
		eventually(|| spy.stop_code() == Some(Error::InternalGroup.to_code())).await;

		// ...but the session stays up.
		assert!(client_transport.close_code().is_none());
		client.update_bitrate(1).unwrap();
	}

	#[tokio::test]
	async fn closed_fast_fail() {
		let (client, _server, transport, _st) = establish(FakeMux::new()).await;

		client.close(Error::ProtocolViolation);

		// Every API call fails fast with the cached error.
		let err = client
			.subscribe("/room/alice", "video", TrackConfig::default())
			.await
			.unwrap_err();
		assert!(matches!(err, Error::ProtocolViolation));
		assert!(matches!(client.announced("/room/").await, Err(Error::ProtocolViolation)));
		assert!(matches!(client.update_bitrate(1), Err(Error::ProtocolViolation)));

		assert_eq!(transport.close_code(), Some(Error::ProtocolViolation.to_code()));
	}

	#[test]
	fn subscribe_ids_any_order() {
		let mut state = State::<fake::FakeSession>::default();

		// Subscriptions arrive on independent streams; a compliant peer's ids
		// may still be observed out of order.
		state.accept_subscribe(1, None).unwrap();
		state.accept_subscribe(0, None).unwrap();

		// Only reuse is an error, and it stays scoped to the stream.
		assert!(matches!(state.accept_subscribe(1, None), Err(Error::DuplicatedSubscribe)));

		assert!(matches!(state.accept_subscribe(5, Some(5)), Err(Error::TooManySubscribes)));
		state.accept_subscribe(4, Some(5)).unwrap();
	}
}
