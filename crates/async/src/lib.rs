//! Concurrency primitives shared by the transfer orchestrators.
//!
//! [`Limiter`] bounds how many units of work run at once; [`AsyncError`]
//! records the first real failure among them and cancels the rest.

mod error;
mod limiter;

pub use error::{AsyncError, Cancellation};
pub use limiter::Limiter;
