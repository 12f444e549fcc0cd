//! Foundational low-level utilities shared across Redes crates.
//!
//! Provides time helpers and mirror-key allocation used by the ticket store,
//! the reconciler, and session expiry calculations.

pub mod mirror_key;
pub mod time_utils;

pub use mirror_key::{allocate_mirror_key, is_mirror_key, MIRROR_KEY_PREFIX};
pub use time_utils::{
    current_unix_timestamp, current_unix_timestamp_ms, is_expired_unix, naive_local_timestamp,
};
