//! idle-heartbeatd - publishes whether the workstation user is idle or active
//! to an MQTT broker.
//!
//! On a fixed interval the daemon samples the host's time-since-last-input,
//! classifies it against a 30 second threshold, and publishes `idle` or
//! `active` (retained) on a status topic. Broker outages are tolerated: a
//! failed tick is logged and the next tick retries.

pub mod broker;
pub mod config;
pub mod domain;
pub mod idle;
pub mod publisher;
pub mod scheduler;

#[cfg(test)]
mod testing;
