//! # moqt: Media over QUIC transport, lite profile
//!
//! A pub/sub transport for real-time media over QUIC or WebTransport.
//! Broadcasts are named by hierarchical paths; each broadcast carries tracks,
//! each track carries groups (delivered out-of-order, one uni-stream each),
//! and each group carries frames (delivered in order).
//!
//! The connection is established externally; this crate performs the
//! handshake and drives the session:
//! - [Client::connect] or [Server::accept] to start a [Session].
//! - [TrackMux::publish] or [TrackMux::announce] to serve broadcasts, with a
//!   [TrackHandler] invoked per subscription.
//! - [Session::subscribe] to request a track, then
//!   [TrackReader::accept_group] and [GroupReader::read_frame] to consume it.
//! - [Session::announced] to discover broadcasts under a path prefix.

mod announced;
mod announcement;
mod client;
mod error;
mod frame;
mod group;
mod mux;
mod scheduler;
mod server;
mod session;
mod setup;
mod track;

pub mod coding;
pub mod message;
pub mod path;

#[cfg(test)]
mod fake;

pub use announced::*;
pub use announcement::*;
pub use client::*;
pub use error::*;
pub use frame::*;
pub use group::*;
pub use mux::*;
pub use server::*;
pub use session::*;
pub use setup::*;
pub use track::*;

/// The ALPN token for MOQ over raw QUIC.
///
/// WebTransport connections negotiate "h3" instead and carry the session
/// inside HTTP/3.
pub const ALPN: &str = "moq-00";
