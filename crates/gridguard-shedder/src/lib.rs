//! gridguard-shedder: admission shedding for request-serving paths.
//!
//! The shedder estimates how many requests the service can safely have in
//! flight from what it has recently sustained, Little's-Law style:
//!
//! ```text
//! max_flight = max_pass_per_bucket × buckets_per_second
//!            × min_rt_ms / 1000 × beta_decay
//! ```
//!
//! A request is shed only while the host is flagged overloaded by an
//! [`OverloadProbe`] *and* both the smoothed and the instantaneous in-flight
//! count exceed that bound. After a shed decision every request is rejected
//! for a short cool-off, so a burst of rejects skips the estimate.
//!
//! # Architecture
//!
//! ```text
//! AdmissionShedder
//!   ├── allow() → Promise          ← called per request
//!   │     └── mark_success()/mark_fail() → pass_window, rt_window
//!   ├── OverloadProbe              ← CpuProbe (CpuSampler), ManualProbe, closure
//!   └── run_reporter()             → periodic ShedderReport
//! ```

pub mod cpu;
pub mod error;
pub mod probe;
pub mod shedder;
pub mod stats;

pub use cpu::CpuSampler;
pub use error::ShedderError;
pub use probe::{CpuProbe, ManualProbe, OverloadProbe};
pub use shedder::{AdmissionShedder, Promise};
pub use stats::ShedderReport;
