//! COMET Common Library
//!
//! This crate provides the shared types, constants and configuration loading
//! utilities used by the COMET worker cache crates.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Shared constants (naming, sizes, endpoint defaults)
//! - [`value`] - Cacheable value model: payload kinds, dtypes, scalars
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! comet = { package = "comet_common", path = "../comet_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use comet_common::consts::*;
//! use comet_common::config::{CacheConfig, ConfigLoader};
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod value;
