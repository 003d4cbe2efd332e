//! Drivers
//!
//! Each driver implements one user-facing operation on top of the suite
//! loader, the test case runner and the store. Progress is reported through
//! caller-supplied hook traits; drivers never print anything themselves.

pub mod scan_results;
