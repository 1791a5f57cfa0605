//! Security helpers

pub mod timing;

pub use timing::{verify_secret, AuthTimer};
