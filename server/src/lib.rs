//! # Game Server Library
//!
//! The hub of a replicated game session. The server accepts peers over TCP,
//! hands each one a peer id during the handshake, and keeps the master copy
//! of every shared object.
//!
//! ## Responsibilities
//!
//! ### Session Management
//! - Peer registration when a connection is accepted
//! - A full snapshot of the game state for every newcomer
//! - Cleanup when a connection closes or faults
//!
//! ### Delta Relay
//! Each peer sends the changes of the objects it owns. The server applies
//! them to its own manager and forwards the unchanged payload to every other
//! peer, so all managers converge on the union of all populations.
//!
//! ### Fault Isolation
//! A peer whose change set cannot be decoded or applied is disconnected; the
//! error is kept for the host and no other peer is affected.
//!
//! ## Single-Threaded Event Loop
//! Nothing runs in the background. The host calls
//! [`sessions::SessionServer::tick`] at its frame rate; each tick runs one
//! non-blocking poll pass, handles the resulting events, then broadcasts the
//! server's own delta.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::sessions::SessionServer;
//! use shared::{game, ListenConfig};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(game::registry()?);
//!     let mut server = SessionServer::new(&ListenConfig::default(), registry)?;
//!
//!     loop {
//!         server.tick()?;
//!         std::thread::sleep(std::time::Duration::from_millis(16));
//!     }
//! }
//! ```

pub mod sessions;
