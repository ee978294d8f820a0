//! Building blocks of the `burst-runner` binary

pub mod api;
pub mod config;
