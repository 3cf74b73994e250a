//! Quotamock - Rate-Limited Mock API
//!
//! This crate serves generated JSON payloads behind a fixed-window rate
//! limiter whose quota is chosen by the caller on every request
//! (`?rateLimit=10/s`). Each response reports the bucket's quota state so
//! clients can exercise their own throttling logic against it.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod provider;
pub mod ratelimit;
