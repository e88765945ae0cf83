//! QUIC transport layer for CSI messages.
//!
//! This module provides [`CsiClient`](client::CsiClient) and
//! [`CsiServer`](server::CsiServer) that communicate [`CsiMessage`] values
//! over QUIC bi-directional streams using `quinn`.  Each stream carries one
//! JSON-encoded request followed by one JSON-encoded response.
//!
//! [`CsiMessage`]: crate::message::CsiMessage

pub mod client;
pub mod server;

pub use client::CsiClient;
pub use server::{CsiServer, Services, dispatch};

/// Upper bound on a single encoded message.
pub(crate) const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
