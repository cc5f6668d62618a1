//! Command handlers

pub mod config;
pub mod document;
pub mod status;
