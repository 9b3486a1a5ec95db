//! Generic utility primitives with zero release knowledge.
//!
//! - `command` - Command execution with error handling and deadlines
//! - `template` - `${path}` template rendering

pub mod command;
pub mod template;
