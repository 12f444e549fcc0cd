//! HTTP surface for the Redes ticket mirror.

pub mod mirror_server;

pub use mirror_server::*;
