//! Core types and errors for the in-process publish/subscribe engine.

pub mod error;
pub mod greeting;
pub mod record;

pub use error::{Error, Result};
pub use greeting::Greeting;
pub use record::*;
