//! Core configuration — types and YAML parsing.

pub mod parser;
pub mod types;
