use std::{collections::HashMap, sync::Arc};

use futures::{stream::FuturesUnordered, StreamExt};
use tokio::sync::watch;
use web_async::Lock;

use crate::{
	coding::{Reader, Stream, Writer},
	message,
	mux::TrackMux,
	path,
	track::{TrackConfig, TrackWriter},
	Announcement, Error,
};

use super::Session;

/// Serves the subscriptions for a broadcast resolved through the multiplexer.
pub trait TrackHandler<S: web_transport_trait::Session>: Send + Sync {
	/// Take ownership of a new subscription; implementations typically spawn.
	fn serve(&self, track: TrackWriter<S>);
}

impl<S: web_transport_trait::Session, F: Fn(TrackWriter<S>) + Send + Sync> TrackHandler<S> for F {
	fn serve(&self, track: TrackWriter<S>) {
		self(track)
	}
}

/// The handler tree shared by every session serving the same broadcasts.
pub type SessionMux<S> = TrackMux<Arc<dyn TrackHandler<S>>>;

impl<S: web_transport_trait::Session> Session<S> {
	pub(super) async fn serve_subscribe(self, stream: Stream<S>) {
		let Stream { mut writer, mut reader } = stream;

		let subscribe = match reader.decode_message::<message::Subscribe>().await {
			Ok(msg) => msg,
			Err(err) => {
				writer.abort(&err);
				reader.abort(&err);
				return;
			}
		};

		let id = subscribe.subscribe_id;

		if let Err(err) = self.check_subscribe(&subscribe) {
			writer.abort(&err);
			reader.abort(&err);
			return;
		}

		let config = TrackConfig {
			priority: subscribe.priority,
			group_order: subscribe.group_order,
			min_group_sequence: subscribe.min_group_sequence,
			max_group_sequence: subscribe.max_group_sequence,
			parameters: subscribe.parameters.clone(),
		};

		if let Err(err) = config.validate() {
			writer.abort(&err);
			reader.abort(&err);
			return;
		}

		let Some(handler) = self.mux.handler(&subscribe.broadcast_path) else {
			tracing::debug!(id, broadcast = %subscribe.broadcast_path, "track not found");
			let err = Error::TrackNotFound;
			writer.abort(&err);
			reader.abort(&err);
			return;
		};

		// Pick the delivery order if the subscriber deferred to us.
		let group_order = match config.group_order {
			message::GroupOrder::Default => message::GroupOrder::Descending,
			order => order,
		};

		let ok = message::SubscribeOk {
			group_order,
			parameters: message::Parameters::new(),
		};
		if let Err(err) = writer.encode_message(&ok).await {
			writer.abort(&err);
			reader.abort(&err);
			return;
		}

		tracing::debug!(id, broadcast = %subscribe.broadcast_path, track = %subscribe.track, "subscription started");

		let config = Lock::new(TrackConfig { group_order, ..config });
		let (closed_tx, closed_rx) = watch::channel(None);

		// The update loop owns the read half for the life of the subscription.
		let pump_config = config.clone();
		web_async::spawn(async move {
			let res = async {
				while let Some(update) = reader.decode_message_maybe::<message::SubscribeUpdate>().await? {
					tracing::debug!(id, ?update, "subscription updated");
					pump_config.lock().apply_update(&update)?;
				}
				Ok(())
			}
			.await;

			let err = match res {
				// A clean FIN is the subscriber unsubscribing.
				Ok(()) => Error::SubscribeCancelled,
				Err(err) => {
					reader.abort(&err);
					err
				}
			};

			tracing::debug!(id, %err, "subscription ended");
			let _ = closed_tx.send(Some(err));
		});

		let track = TrackWriter::new(
			self.session.clone(),
			id,
			subscribe.broadcast_path,
			subscribe.track,
			config,
			self.scheduler.clone(),
			writer,
			closed_rx,
		);

		handler.serve(track);
	}

	fn check_subscribe(&self, subscribe: &message::Subscribe) -> Result<(), Error> {
		let mut state = self.state.lock();

		if let Some(err) = &state.closed {
			return Err(err.clone());
		}

		state.accept_subscribe(subscribe.subscribe_id, self.options.max_subscribe_id)
	}

	pub(super) async fn serve_announce(self, stream: Stream<S>) {
		let Stream { mut writer, mut reader } = stream;

		let please = match reader.decode_message::<message::AnnouncePlease>().await {
			Ok(msg) => msg,
			Err(err) => {
				writer.abort(&err);
				reader.abort(&err);
				return;
			}
		};

		let prefix = please.prefix;

		let announced = if path::is_valid_prefix(&prefix) {
			self.mux.announced(&prefix)
		} else {
			Err(Error::ProtocolViolation)
		};

		let (snapshot, updates) = match announced {
			Ok(announced) => announced,
			Err(err) => {
				writer.abort(&err);
				reader.abort(&err);
				return;
			}
		};

		tracing::debug!(%prefix, "announce stream started");

		if let Err(err) = Self::run_announce(&mut writer, &mut reader, &prefix, snapshot, updates).await {
			tracing::debug!(%prefix, %err, "announce stream failed");
			writer.abort(&err);
			reader.abort(&err);
		}

		// The subscription left nodes behind on the walk to the prefix.
		self.mux.prune(&prefix);
	}

	async fn run_announce(
		writer: &mut Writer<S::SendStream>,
		reader: &mut Reader<S::RecvStream>,
		prefix: &str,
		snapshot: Vec<Announcement>,
		updates: async_channel::Receiver<Announcement>,
	) -> Result<(), Error> {
		let mut actives: HashMap<String, Announcement> = HashMap::new();
		for announcement in snapshot {
			if let Some(suffix) = announcement.suffix(prefix) {
				actives.insert(suffix.to_string(), announcement.clone());
			}
		}

		writer
			.encode_message(&message::AnnounceInit {
				suffixes: actives.keys().cloned().collect(),
			})
			.await?;

		let mut ends = FuturesUnordered::new();
		for (suffix, announcement) in &actives {
			ends.push(wait_end(suffix.clone(), announcement.clone()));
		}

		loop {
			tokio::select! {
				update = updates.recv() => {
					let announcement = match update {
						Ok(announcement) => announcement,
						Err(_) => return Ok(()),
					};
					let Some(suffix) = announcement.suffix(prefix).map(str::to_string) else {
						continue;
					};

					// A replacement first ends the suffix on the wire, keeping
					// the strict ACTIVE/ENDED alternation.
					if actives.remove(&suffix).is_some() {
						writer
							.encode_message(&message::Announce {
								status: message::AnnounceStatus::Ended,
								suffix: suffix.clone(),
							})
							.await?;
					}

					writer
						.encode_message(&message::Announce {
							status: message::AnnounceStatus::Active,
							suffix: suffix.clone(),
						})
						.await?;

					actives.insert(suffix.clone(), announcement.clone());
					ends.push(wait_end(suffix, announcement));
				}
				Some((suffix, announcement)) = ends.next(), if !ends.is_empty() => {
					// Skip if the suffix has since been superseded.
					if actives.get(&suffix).is_some_and(|a| a.same(&announcement)) {
						actives.remove(&suffix);
						writer
							.encode_message(&message::Announce {
								status: message::AnnounceStatus::Ended,
								suffix,
							})
							.await?;
					}
				}
				res = reader.closed() => {
					// The subscriber is done with the prefix.
					return res;
				}
			}
		}
	}
}

async fn wait_end(suffix: String, announcement: Announcement) -> (String, Announcement) {
	announcement.ended().await;
	(suffix, announcement)
}
