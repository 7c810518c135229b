//! gridguard-window: the statistics primitive shared by the guards.
//!
//! A [`RollingWindow`] splits a trailing time span into `size` equal
//! buckets, each accumulating a `(sum, count)` pair. Buckets advance and
//! expire lazily: nothing runs in the background, and every `add`/`reduce`
//! works out from a single clock sample how many buckets have elapsed.
//!
//! ```text
//!  oldest                              current
//!  ┌──────┬──────┬──────┬──────┬──────┐
//!  │ b[2] │ b[3] │ b[4] │ b[0] │ b[1] │   offset = 1
//!  └──────┴──────┴──────┴──────┴──────┘
//!  ◀──────── size × bucket_duration ───────▶
//! ```
//!
//! Both the adaptive breaker and the admission shedder read their windows
//! with `ignore_current`, since a half-filled bucket would bias the stats.

pub mod bucket;
pub mod rolling;

pub use bucket::Bucket;
pub use rolling::RollingWindow;
