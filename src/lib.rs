//! kumo: revertible cloud-lifecycle templates.
//!
//! Parse a line-oriented template, resolve references, aliases and holes, dispatch each
//! statement to a registered driver, record what ran, and derive the template that undoes it.

pub mod cli;
pub mod core;
pub mod drivers;
pub mod journal;
