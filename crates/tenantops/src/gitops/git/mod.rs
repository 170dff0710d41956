//! Thin wrapper over the `git` CLI.

pub mod auth;
pub mod parse;
pub mod repository;
pub mod types;

pub use repository::GitRepository;
pub use types::*;
