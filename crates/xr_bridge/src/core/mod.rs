//! Core runtime types
//!
//! Error codes shared by every API entry point and the runtime settings.

pub mod config;
pub mod error;
