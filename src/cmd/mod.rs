//! CLI command implementations.

pub mod serve;

pub use serve::{cmd_init_db, cmd_serve};
