//! Data models for the shelter backend.
//!
//! Field names follow the upstream open-data feed and the stored user
//! documents so both round-trip without translation.

mod animal;
mod user;

pub use animal::*;
pub use user::*;
