pub mod action;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod git;
pub mod io;
pub mod ledger;
pub mod paths;
pub mod remote;
pub mod rules;
pub mod snapshot;
pub mod source;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Result, StewardError};
