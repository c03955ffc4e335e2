//! Core types and pure computations for the Ladder standings engine.
//!
//! This crate is deliberately free of database and filesystem dependencies.
//! Standings calculation and consistency validation are pure functions over
//! in-memory data; persistence is abstracted behind [`store::LeagueStore`].

pub mod audit;
pub mod calculator;
pub mod error;
pub mod fixture;
pub mod inconsistency;
pub mod league;
pub mod migration;
pub mod standing;
pub mod store;
pub mod validate;

pub use error::{Error, Result};
