//! Macros shared across the compiler crates.

mod error;

#[cfg(feature = "assertion-macros")]
mod assertions;
