//! Infrastructure concerns shared by every crate in the workspace: runtime
//! configuration and logger setup.

pub mod config;
pub mod logging;
