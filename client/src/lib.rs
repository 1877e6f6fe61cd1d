//! # Game Client Library
//!
//! Client side of a replicated game session. A client owns one outbound
//! connection to the server and one object manager holding both its own
//! objects and the replicas announced by everyone else.
//!
//! ## Connection Lifecycle
//!
//! ### Handshake
//! The server answers every accepted connection with the protocol version
//! and the peer id it assigned. Until that arrives the client's manager uses
//! a placeholder id and nothing is sent.
//!
//! ### Identity Migration
//! Once the id is known the manager adopts it. Objects created before the
//! handshake move into the assigned id space, so two clients never announce
//! the same id. Their pending attributes and messages go out with the first
//! delta.
//!
//! ### Delta Exchange
//! Every tick the client applies the change sets relayed by the server and
//! sends the changes of its own objects.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::session::ClientSession;
//! use shared::{game, DEFAULT_PORT};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(game::registry()?);
//!     let mut session = ClientSession::new("127.0.0.1", DEFAULT_PORT, registry)?;
//!
//!     while session.is_open() {
//!         session.tick()?;
//!         std::thread::sleep(std::time::Duration::from_millis(16));
//!     }
//!     Ok(())
//! }
//! ```

pub mod session;
