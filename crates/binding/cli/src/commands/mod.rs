//! bindctl subcommands

pub mod canonical;
pub mod config;
pub mod lookup;
pub mod replay;
