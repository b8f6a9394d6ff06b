//! Integration tests
//!
//! End-to-end behavior of the facade and sync engine against scripted and
//! mocked servers.

mod drain_scenarios;
mod http_transport_test;
mod persistence_test;
