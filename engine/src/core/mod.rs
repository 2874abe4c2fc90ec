//! # guestrs Core Infrastructure
//!
//! File: engine/src/core/mod.rs
//!
//! ## Overview
//!
//! This module aggregates the core infrastructure components shared by every
//! part of the engine: configuration, error types and the retry policy.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading, merging, and validation
//! - `error`: The `GuestError` enum and the engine `Result` alias
//! - `retry`: Explicit retry policy (attempts, fixed delay, error predicate)
//!
//! ## Usage
//!
//! ```rust
//! use guestrs_engine::core::config; // For loading configuration
//! use guestrs_engine::core::error::{GuestError, Result}; // For error handling
//! use guestrs_engine::core::retry::RetryPolicy; // For retried network operations
//! ```
//!
pub mod config;
pub mod error;
pub mod retry;
