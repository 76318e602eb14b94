//! A multi-session SMPP endpoint simulator.
//!
//! Accepts SMPP client connections, authenticates binds against a flat-file
//! users table, records submitted messages and produces delivery receipts.
//! Driven interactively through an operator console.

pub mod delivery;
pub mod listener;
pub mod pdu;
pub mod processor;
pub mod simulator;
pub mod store;
pub mod telemetry;
pub mod users;
