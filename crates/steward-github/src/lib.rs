//! GitHub backend: polls issues and pull requests as change events, lists
//! open subjects with their labels and check status, and applies comment,
//! label, close and merge actions through the REST API.

mod catalog;
mod client;
mod error;
mod events;
mod wire;

pub use client::GitHubClient;
pub use error::GitHubError;
pub use events::{decode_cursor, encode_cursor};
