//! Core types for arbiterdb
//!
//! This crate defines the fundamental types shared by every layer:
//! - [`Error`]: the canonical error taxonomy (contention, job failure,
//!   misuse, shutdown)
//! - [`Value`] / [`Row`]: the minimal value model crossing the engine seam
//! - [`Connection`] / [`ConnectionFactory`]: the traits the caller's
//!   engine binding implements
//!
//! The engine itself (SQL text, schema, file format) is owned by the
//! caller. This crate only defines the seam the dispatch and lock layers
//! coordinate over.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod value;

pub use connection::{Connection, ConnectionFactory};
pub use error::{Error, Result};
pub use value::{Row, Value};
