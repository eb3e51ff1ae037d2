//! Command Handlers Module
//!
//! This module contains handlers for all CLI subcommands.

pub mod detect;
pub mod exec;
