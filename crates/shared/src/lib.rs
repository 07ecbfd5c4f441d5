//! Unme shared library: identities, wire envelopes and REST contracts shared between relay and client.

pub mod api;
pub mod constants;
pub mod error;
pub mod ids;
pub mod time;
