//! # Homeo Core
//!
//! Error type, `Result` alias and the file loaders shared by every Homeo crate.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod load;
pub mod result;

pub use error::Error;
pub use load::{load_json, load_toml};
pub use result::Result;
