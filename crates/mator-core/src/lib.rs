//! Core types and collaborator traits for the MATor descriptor database.
//!
//! This crate is free of database, network and parsing dependencies. Every
//! other crate in the workspace depends on it.

pub mod descriptor;
pub mod error;
pub mod lookup;
pub mod month;
pub mod record;
pub mod source;

pub use error::{Error, Result};
