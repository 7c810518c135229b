//! gridguard-balancer: client-side connection picking.
//!
//! A [`PickerBuilder`] turns the current set of ready connections into a
//! [`Picker`]. The picker is rebuilt whenever that set changes; per-connection
//! statistics live exactly as long as one picker.
//!
//! The only builder shipped here is [`P2cBuilder`] (`"p2c_ewma"`): it draws
//! two connections at random and calls the one with the lower
//! `sqrt(lag + 1) × (in_flight + 1)` load, where `lag` is an EWMA of observed
//! latency. A connection that has not been picked for `force_pick` is
//! picked regardless, so a slow backend still gets probed.
//!
//! ```text
//! pick(info) → Picked { conn, addr, done }
//!                                    └── done.finish(status) → lag / success EWMA
//! ```

pub mod error;
pub mod p2c;
pub mod picker;

pub use error::PickError;
pub use p2c::{ConnStats, P2C_EWMA, P2cBuilder, P2cPicker, is_failure};
pub use picker::{Completion, Done, PickInfo, Picked, Picker, PickerBuilder, ReadyConn};
