//! Real-time position hub for multiplayer clients.
//!
//! Clients connect over WebSocket at `GET /ws`, report their own position and
//! facing, and receive everyone else's. Each module owns one concern:
//!
//! - [`connection`] wraps the transport into a write handle and a reader.
//! - [`registry`] keeps live connections and player states in step under one
//!   lock.
//! - [`dispatcher`] runs the single delivery loop that fans events out.
//! - [`session`] drives one connection from join to leave.
//! - [`message`] holds the JSON envelope and typed events.
//! - [`server`] wires the HTTP route, identities, and shutdown together.
//! - [`cli`] parses the command-line flags.

pub mod cli;
pub mod connection;
pub mod dispatcher;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
