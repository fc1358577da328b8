//! Core types and traits for diva-stream
//!
//! This crate provides the data model carried on the message bus, the
//! broadcast hub itself, configuration loading and logging setup shared by
//! the transport, engine and CLI crates.

pub mod bus;
pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

pub use error::{Error, Result};
