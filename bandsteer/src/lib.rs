// Band Steering Library
// Shared modules for daemon and tests

#![warn(missing_docs)]

//! Band Steering Library
//!
//! This library provides the core of a Wi-Fi band steering engine: it keeps
//! track of groups of radios, their BSSes and neighbors, and decides per
//! station where it should be associated, driving ACL, BTM and deauth
//! requests towards the radio driver to get it there.
//!
//! # Main Components
//!
//! - [`bm`]: Entity graph, work pass and engine entry points
//! - [`steer`]: Per-station steering instance (candidates, policies, executor)
//! - [`policy`]: Policy stack and every steering policy
//! - [`executor`]: Executor actions and the outbound driver trait
//! - [`candidate`]: Candidate list, preferences and kick decision
//! - [`assessor`]: Candidate metrics from neighbor priority and RRM reports
//! - [`ieee80211`]: Association request parsing
//! - [`config`]: Configuration file parsing and validation
//! - [`dump_file`]: Engine dump writer
//! - [`types`]: Shared data structures
//! - [`timer`], [`versioned`]: Deadline timers and double-buffered attributes

pub mod assessor;
pub mod bm;
pub mod candidate;
pub mod config;
pub mod dump_file;
pub mod executor;
pub mod ieee80211;
pub mod policy;
pub mod steer;
pub mod timer;
pub mod types;
pub mod versioned;
