//! Waste-opportunity agent
//!
//! Runs the detection cycle on a fixed interval and serves the command
//! surface (health, metrics, opportunities, approvals, proposals, reports).

pub mod api;
pub mod config;
