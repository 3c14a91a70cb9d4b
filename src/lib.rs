//! Image compression and cache-consistency engine.
//!
//! Source URLs are canonicalised into cache keys, compressed by one of two
//! interchangeable engines, stored as blob + metadata record and optionally
//! swapped in at the origin commerce platform. Archived originals make every
//! swap reversible.

pub mod api;
pub mod canonical;
pub mod codec;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod origin;
pub mod server;
pub mod source;
pub mod store;
