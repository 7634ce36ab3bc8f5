//! Command handlers

pub mod config;
pub mod document;
pub mod migrate;
pub mod status;
