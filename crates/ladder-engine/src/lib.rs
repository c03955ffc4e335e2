//! Operational engine for Ladder: snapshots, repair, relation migration,
//! standings recalculation and reporting.
//!
//! Every component works against any [`ladder_core::store::LeagueStore`] held
//! behind an `Arc`. Nothing here prompts or prints; confirmation and output
//! belong to the caller.

pub mod audit;
pub mod backup;
pub mod config;
pub mod dataset;
pub mod error;
pub mod migration;
pub mod notify;
pub mod recalc;
pub mod repair;
pub mod report;
pub mod transform;

pub use error::{Error, Result};

#[cfg(test)]
mod testing;
