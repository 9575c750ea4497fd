//! An in-memory transport for exercising sessions without a network.
//!
//! Both endpoints of [pair] share the connection state; streams are byte
//! pipes with the same FIN/RESET/STOP lifecycle as a QUIC stream.

use std::sync::{Arc, Mutex};

use bytes::{Buf, BytesMut};
use tokio::sync::Notify;

#[derive(Clone, Debug, thiserror::Error)]
pub enum FakeError {
	#[error("closed")]
	Closed,
	#[error("session error: {0}")]
	Session(u32),
	#[error("stream error: {0}")]
	Stream(u32),
}

impl web_transport_trait::Error for FakeError {
	fn session_error(&self) -> Option<(u32, String)> {
		match self {
			Self::Session(code) => Some((*code, String::new())),
			_ => None,
		}
	}

	fn stream_error(&self) -> Option<u32> {
		match self {
			Self::Stream(code) => Some(*code),
			_ => None,
		}
	}
}

#[derive(Default)]
struct PipeState {
	buffer: BytesMut,
	fin: bool,
	reset: Option<u32>,
	stopped: Option<u32>,
	priority: Option<u8>,
}

#[derive(Clone, Default)]
struct Pipe {
	state: Arc<Mutex<PipeState>>,
	notify: Arc<Notify>,
}

/// A single unidirectional byte pipe.
pub fn stream() -> (FakeSend, FakeRecv) {
	let pipe = Pipe::default();
	(FakeSend { pipe: pipe.clone() }, FakeRecv { pipe })
}

/// The send half of a pipe. Clones observe the same stream, which tests use
/// to inspect state after handing the stream off.
#[derive(Clone)]
pub struct FakeSend {
	pipe: Pipe,
}

impl FakeSend {
	/// The last priority set on the stream.
	pub fn priority(&self) -> Option<u8> {
		self.pipe.state.lock().unwrap().priority
	}

	/// The STOP_SENDING code received from the reader, if any.
	pub fn stop_code(&self) -> Option<u32> {
		self.pipe.state.lock().unwrap().stopped
	}
}

impl web_transport_trait::SendStream for FakeSend {
	type Error = FakeError;

	async fn write(&mut self, buf: &[u8]) -> Result<usize, FakeError> {
		{
			let mut state = self.pipe.state.lock().unwrap();
			if let Some(code) = state.stopped {
				return Err(FakeError::Stream(code));
			}
			if state.reset.is_some() || state.fin {
				return Err(FakeError::Closed);
			}
			state.buffer.extend_from_slice(buf);
		}

		self.pipe.notify.notify_waiters();
		Ok(buf.len())
	}

	fn set_priority(&mut self, order: u8) {
		self.pipe.state.lock().unwrap().priority = Some(order);
	}

	fn finish(&mut self) -> Result<(), FakeError> {
		{
			let mut state = self.pipe.state.lock().unwrap();
			if let Some(code) = state.stopped {
				return Err(FakeError::Stream(code));
			}
			if state.reset.is_some() {
				return Err(FakeError::Closed);
			}
			state.fin = true;
		}

		self.pipe.notify.notify_waiters();
		Ok(())
	}

	fn reset(&mut self, code: u32) {
		{
			let mut state = self.pipe.state.lock().unwrap();
			// Like QUIC, a reset after a FIN or another reset is a no-op.
			if state.fin || state.reset.is_some() {
				return;
			}
			state.reset = Some(code);
			state.buffer.clear();
		}

		self.pipe.notify.notify_waiters();
	}

	async fn closed(&mut self) -> Result<(), FakeError> {
		loop {
			let notified = self.pipe.notify.notified();
			{
				let state = self.pipe.state.lock().unwrap();
				if let Some(code) = state.stopped {
					return Err(FakeError::Stream(code));
				}
				if state.reset.is_some() {
					return Ok(());
				}
				if state.fin && state.buffer.is_empty() {
					// The peer read everything; treat the FIN as acknowledged.
					return Ok(());
				}
			}
			notified.await;
		}
	}
}

/// The receive half of a pipe.
pub struct FakeRecv {
	pipe: Pipe,
}

impl web_transport_trait::RecvStream for FakeRecv {
	type Error = FakeError;

	async fn read(&mut self, dst: &mut [u8]) -> Result<Option<usize>, FakeError> {
		loop {
			let notified = self.pipe.notify.notified();
			{
				let mut state = self.pipe.state.lock().unwrap();
				if !state.buffer.is_empty() {
					let size = dst.len().min(state.buffer.len());
					dst[..size].copy_from_slice(&state.buffer[..size]);
					state.buffer.advance(size);
					return Ok(Some(size));
				}
				if let Some(code) = state.reset {
					return Err(FakeError::Stream(code));
				}
				if state.fin {
					return Ok(None);
				}
				if state.stopped.is_some() {
					return Err(FakeError::Closed);
				}
			}
			notified.await;
		}
	}

	fn stop(&mut self, code: u32) {
		{
			let mut state = self.pipe.state.lock().unwrap();
			if state.stopped.is_some() {
				return;
			}
			state.stopped = Some(code);
		}

		self.pipe.notify.notify_waiters();
	}

	async fn closed(&mut self) -> Result<(), FakeError> {
		loop {
			let notified = self.pipe.notify.notified();
			{
				let state = self.pipe.state.lock().unwrap();
				if let Some(code) = state.reset {
					return Err(FakeError::Stream(code));
				}
				if state.stopped.is_some() {
					return Ok(());
				}
				if state.fin && state.buffer.is_empty() {
					return Ok(());
				}
			}
			notified.await;
		}
	}
}

/// One endpoint of an in-memory connection.
#[derive(Clone)]
pub struct FakeSession {
	bi_tx: async_channel::Sender<(FakeSend, FakeRecv)>,
	bi_rx: async_channel::Receiver<(FakeSend, FakeRecv)>,
	uni_tx: async_channel::Sender<FakeRecv>,
	uni_rx: async_channel::Receiver<FakeRecv>,

	close_code: Arc<Mutex<Option<u32>>>,
	notify: Arc<Notify>,
}

/// Two connected endpoints sharing the connection state.
pub fn pair() -> (FakeSession, FakeSession) {
	let (bi_ab_tx, bi_ab_rx) = async_channel::unbounded();
	let (bi_ba_tx, bi_ba_rx) = async_channel::unbounded();
	let (uni_ab_tx, uni_ab_rx) = async_channel::unbounded();
	let (uni_ba_tx, uni_ba_rx) = async_channel::unbounded();

	let close_code = Arc::new(Mutex::new(None));
	let notify = Arc::new(Notify::new());

	let a = FakeSession {
		bi_tx: bi_ab_tx,
		bi_rx: bi_ba_rx,
		uni_tx: uni_ab_tx,
		uni_rx: uni_ba_rx,
		close_code: close_code.clone(),
		notify: notify.clone(),
	};
	let b = FakeSession {
		bi_tx: bi_ba_tx,
		bi_rx: bi_ab_rx,
		uni_tx: uni_ba_tx,
		uni_rx: uni_ab_rx,
		close_code,
		notify,
	};

	(a, b)
}

impl FakeSession {
	/// The code the connection was closed with, if either side closed it.
	pub fn close_code(&self) -> Option<u32> {
		*self.close_code.lock().unwrap()
	}

	fn error(&self) -> Option<FakeError> {
		self.close_code().map(FakeError::Session)
	}

	async fn wait_closed(&self) -> FakeError {
		loop {
			let notified = self.notify.notified();
			if let Some(err) = self.error() {
				return err;
			}
			notified.await;
		}
	}
}

impl web_transport_trait::Session for FakeSession {
	type SendStream = FakeSend;
	type RecvStream = FakeRecv;
	type Error = FakeError;

	async fn open_bi(&self) -> Result<(FakeSend, FakeRecv), FakeError> {
		if let Some(err) = self.error() {
			return Err(err);
		}

		let (local_send, peer_recv) = stream();
		let (peer_send, local_recv) = stream();
		self.bi_tx
			.send((peer_send, peer_recv))
			.await
			.map_err(|_| FakeError::Closed)?;
		Ok((local_send, local_recv))
	}

	async fn open_uni(&self) -> Result<FakeSend, FakeError> {
		if let Some(err) = self.error() {
			return Err(err);
		}

		let (local_send, peer_recv) = stream();
		self.uni_tx.send(peer_recv).await.map_err(|_| FakeError::Closed)?;
		Ok(local_send)
	}

	async fn accept_bi(&self) -> Result<(FakeSend, FakeRecv), FakeError> {
		tokio::select! {
			res = self.bi_rx.recv() => res.map_err(|_| FakeError::Closed),
			err = self.wait_closed() => Err(err),
		}
	}

	async fn accept_uni(&self) -> Result<FakeRecv, FakeError> {
		tokio::select! {
			res = self.uni_rx.recv() => res.map_err(|_| FakeError::Closed),
			err = self.wait_closed() => Err(err),
		}
	}

	fn send_datagram(&self, _payload: bytes::Bytes) -> Result<(), FakeError> {
		Err(FakeError::Closed)
	}

	async fn recv_datagram(&self) -> Result<bytes::Bytes, FakeError> {
		std::future::pending().await
	}

	fn max_datagram_size(&self) -> usize {
		0
	}

	fn close(&self, code: u32, _reason: &str) {
		{
			let mut closed = self.close_code.lock().unwrap();
			if closed.is_some() {
				return;
			}
			*closed = Some(code);
		}

		self.notify.notify_waiters();
	}

	async fn closed(&self) -> FakeError {
		self.wait_closed().await
	}
}
