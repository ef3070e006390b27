//! ttable row server library
//!
//! Serves rows of a boolean expression's truth table over HTTP, either as a
//! directly computed range or as fixed-size windows over a session's cached
//! enumeration of true rows.

pub mod cache;
pub mod cli;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod producer;
pub mod rows;
pub mod server;
