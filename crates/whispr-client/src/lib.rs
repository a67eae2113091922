//! Whispr client core: note selection and propagation, buddies, direct
//! messages and the notification poller, all on top of a [`Gateway`].
//!
//! Every component takes an `Arc` of the same gateway, so one session can
//! share a single HTTP connection pool or in-process database.

pub mod admin;
pub mod buddies;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod messaging;
pub mod notes;
pub mod notify;
pub mod poller;
pub mod profile;
pub mod propagation;
pub mod speculative;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use gateway::{Gateway, HttpGateway, LocalGateway};
