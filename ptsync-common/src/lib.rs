//! # ptsync Common Library
//!
//! Shared code for the ptsync workspace:
//! - Error and Result types
//! - Configuration file discovery and TOML loading
//! - SQLite pool initialization and destination schema

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
