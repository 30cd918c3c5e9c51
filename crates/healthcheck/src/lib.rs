//! Liveness probing for appdaemon managed services.
//!
//! This crate provides the probing half of the health-monitoring engine:
//! - a [`HealthChecker`] seam with an HTTP implementation
//! - a retry budget that folds several attempts into one [`ProbeOutcome`]
//!
//! Interpreting outcomes (status transitions, restarts) is left to the caller.
//!
//! # Example
//!
//! ```no_run
//! use healthcheck::{HttpChecker, ProbeTarget, RetryPolicy, check_with_retry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let checker = HttpChecker::new(vec![], Duration::from_secs(2))?;
//! let target = ProbeTarget::new("api", "http://127.0.0.1:8080/healthcheck");
//!
//! let outcome = check_with_retry(&checker, &target, &RetryPolicy::default()).await;
//! println!("healthy={} attempts={}", outcome.is_healthy(), outcome.attempt_count());
//! # Ok(())
//! # }
//! ```

pub mod checkers;
pub mod retry;
pub mod types;

pub use checkers::{HealthChecker, HttpChecker};
pub use retry::check_with_retry;
pub use types::{HealthCheckResult, HealthStatus, ProbeOutcome, ProbeTarget, RetryPolicy};
