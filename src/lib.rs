//! HTTP cache-access protocol layer over a distributed key-value store.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
