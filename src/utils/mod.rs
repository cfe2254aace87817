//! Utility modules for the request security subsystem.
//! This module contains common utilities used across the crate.

mod logging;
mod error;

pub use logging::{
    init_logging,
    log_rate_limit,
    log_security_event,
    log_audit_prune,
};

pub use error::{SecurityError, SecurityResult};
