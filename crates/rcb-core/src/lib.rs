//! Core domain + application logic for the session login bot.
//!
//! This crate is intentionally framework-agnostic. The Bot API, the MTProto
//! client and the credential database live behind ports (traits) implemented
//! in adapter crates.

pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod login;
pub mod logout;
pub mod messaging;
pub mod store;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
