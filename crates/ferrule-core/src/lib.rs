//! ferrule-core: Core types and configuration for the ferrule RPC runtime
//!
//! This crate provides the fundamental types shared by every ferrule crate:
//! - Service metadata, requests and responses
//! - Configuration types and strategy keys
//! - Error handling

pub mod config;
pub mod error;
pub mod model;

pub use config::*;
pub use error::*;
pub use model::*;
