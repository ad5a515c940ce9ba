//! Input injector implementations.
//!
//! `android` drives the device's `input` tool; `mock` records events for
//! tests and for `--dry-run`.

pub mod android;
pub mod mock;
