//! HTTP surface — a single client-facing listener.
//!
//! Unlike the dual-port admin/client split this module replaces, clawrouter
//! exposes one port: agents talk `/v1/chat/completions` and `/v1/models`
//! against it, and the same listener also answers `/health` and `/stats` for
//! operators. There is no separate admin authentication surface because
//! there is no separate admin listener.

pub mod client;
pub mod request_id;
