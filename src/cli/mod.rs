//! Command-line interface
//!
//! Argument parsing lives in [`args`]; one module per subcommand in
//! [`commands`].

pub mod args;
pub mod commands;
