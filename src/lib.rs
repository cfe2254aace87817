//! Request security coordination for web applications.
//!
//! Three components, in dependency order: a fixed-window [`core::RateLimiter`]
//! keyed by arbitrary strings, an append-only [`core::AuditLogger`] with
//! retention and export, and the [`service::SecurityManager`] that composes
//! both with IP allow/block lists behind three decision entry points
//! (`check_request`, `check_action`, `check_login`). Dependencies flow one
//! direction only; neither leaf component knows about the other.

pub mod config;
pub mod core;
pub mod service;
pub mod utils;
