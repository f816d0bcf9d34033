//! Core template logic: types, parsing, resolution, execution, revert.

pub mod builder;
pub mod error;
pub mod executor;
pub mod grammar;
pub mod history;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod revert;
pub mod settings;
pub mod types;
