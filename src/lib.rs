//! Client for a streamed "council of agents" debate: decodes the server's
//! event stream, keeps an ordered transcript and reconciles it with persisted
//! history.

pub mod api;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod identity;
pub mod models;
pub mod service;
pub mod transcript;

pub use api::{CouncilApi, HttpCouncilApi};
pub use config::ClientConfig;
pub use errors::ClientError;
pub use service::{ChatController, InitMode};
