//! `Parley`: realtime chat client core.
//!
//! Keeps a live socket to the chat service, reconciles optimistic sends
//! with server-persisted records, tracks who is online, and acknowledges
//! delivery and read receipts. All state transitions run through
//! [`state::ClientState::dispatch`]; [`net::spawn_client`] drives it from
//! the network.

pub mod api;
pub mod chat;
pub mod config;
pub mod connection;
pub mod net;
pub mod presence;
pub mod state;
