//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! gateway, session, upstream
//!     → logging.rs (structured events with session_id fields)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
