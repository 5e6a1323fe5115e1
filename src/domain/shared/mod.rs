//! Shared domain types

pub mod error;
pub mod result;

pub use error::{CoreError, Result};
