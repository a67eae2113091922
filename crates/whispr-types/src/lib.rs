//! Types shared by the Whispr store, its HTTP surface and the client core.

pub mod api;
pub mod events;
pub mod models;
