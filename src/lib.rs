//! Staleness-aware local mirror of a hierarchical page/block content API.
//!
//! [`cache::CacheClient`] wraps any [`application::remote::ContentSource`]
//! and answers the same three read calls, going upstream only when a page's
//! edit time shows the cached copy may be out of date.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
