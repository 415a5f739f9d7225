//! Client core for Parlor channel chat.
//!
//! [`stream::StreamCoordinator`] keeps one live connection scoped to the
//! selected channel, [`reconciler::Reconciler`] merges fetched history with the
//! live feed into a single transcript, and [`session::ChatSession`] drives both
//! from one cooperative event loop.

pub mod api;
pub mod composer;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod reconciler;
pub mod session;
pub mod stream;
pub mod transcript;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use error::{ClientError, ConnectionError, ValidationError};
pub use session::{ChatSession, SessionEvent};
