//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Sitemap rebuild fails:
//!     → failures += 1
//!     → backoff.rs (next attempt not before now + delay(failures))
//!     → previous tree keeps serving in the meantime
//! Rebuild succeeds:
//!     → failures = 0
//! ```
//!
//! # Design Decisions
//! - Jitter spreads retries of processors that failed together
//! - The delay is capped so a fixed sitemap is picked up promptly

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
