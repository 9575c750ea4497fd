use std::{fmt, sync::Arc, time::Duration};

use crate::{
	coding::Stream,
	message::{Parameters, SessionClient, SessionServer, Version, SUPPORTED_VERSIONS},
	Error,
};

/// Produces the opaque extension parameters sent in SESSION_CLIENT.
pub type ClientExtensions = Arc<dyn Fn() -> Parameters + Send + Sync>;

/// Validates the client's extension parameters and produces the server's.
///
/// Returning an error rejects the session, typically with
/// [Error::Unauthorized].
pub type ServerExtensions = Arc<dyn Fn(&Parameters) -> Result<Parameters, Error> + Send + Sync>;

/// Knobs recognised when establishing a session.
#[derive(Clone)]
pub struct SessionOptions {
	/// How long to wait for the peer's half of the handshake.
	pub setup_timeout: Duration,

	/// Advisory ceiling on concurrent subscriptions, enforced locally.
	pub max_subscribe_id: Option<u64>,

	pub client_extensions: Option<ClientExtensions>,
	pub server_extensions: Option<ServerExtensions>,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			setup_timeout: Duration::from_secs(5),
			max_subscribe_id: None,
			client_extensions: None,
			server_extensions: None,
		}
	}
}

impl fmt::Debug for SessionOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionOptions")
			.field("setup_timeout", &self.setup_timeout)
			.field("max_subscribe_id", &self.max_subscribe_id)
			.field("client_extensions", &self.client_extensions.is_some())
			.field("server_extensions", &self.server_extensions.is_some())
			.finish()
	}
}

/// Run the client half of the handshake on the session stream.
pub(crate) async fn connect<S: web_transport_trait::Session>(
	stream: &mut Stream<S>,
	options: &SessionOptions,
) -> Result<(Version, Parameters), Error> {
	let parameters = match &options.client_extensions {
		Some(extensions) => extensions(),
		None => Parameters::default(),
	};

	let client = SessionClient {
		versions: SUPPORTED_VERSIONS.into(),
		parameters,
	};
	stream.writer.encode_message(&client).await?;

	let server: SessionServer = match tokio::time::timeout(options.setup_timeout, stream.reader.decode_message()).await
	{
		Ok(res) => res?,
		Err(_) => return Err(Error::Timeout),
	};

	if !SUPPORTED_VERSIONS.contains(&server.version) {
		return Err(Error::Version(client.versions, [server.version].into()));
	}

	tracing::debug!(version = ?server.version, "connected");

	Ok((server.version, server.parameters))
}

/// Run the server half of the handshake on the session stream.
pub(crate) async fn accept<S: web_transport_trait::Session>(
	stream: &mut Stream<S>,
	options: &SessionOptions,
) -> Result<(Version, Parameters), Error> {
	let client: SessionClient = match tokio::time::timeout(options.setup_timeout, stream.reader.decode_message()).await
	{
		Ok(res) => res?,
		Err(_) => return Err(Error::Timeout),
	};

	let version = client
		.versions
		.iter()
		.find(|v| SUPPORTED_VERSIONS.contains(v))
		.copied()
		.ok_or_else(|| Error::Version(client.versions.clone(), SUPPORTED_VERSIONS.into()))?;

	let parameters = match &options.server_extensions {
		Some(extensions) => extensions(&client.parameters)?,
		None => Parameters::default(),
	};

	stream.writer.encode_message(&SessionServer { version, parameters }).await?;

	tracing::debug!(?version, "accepted");

	Ok((version, client.parameters))
}
