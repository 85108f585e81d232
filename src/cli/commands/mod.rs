//! Individual CLI commands

pub mod goals;
pub mod investments;
pub mod login;
pub mod logout;
pub mod publish;
pub mod stats;
pub mod status;
pub mod watch;
