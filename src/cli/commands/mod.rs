//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod info;
pub mod serve;
pub mod validate;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands};
use crate::error::StallgateError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// `cancel` is fired by the signal handler and stops a running gateway.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), StallgateError> {
    match cli.command {
        Commands::Serve(args) => serve::run(&args, cancel).await,
        Commands::Validate(args) => validate::run(&args),
        Commands::Completions(args) => {
            info::completions(&args);
            Ok(())
        }
        Commands::Version(args) => info::version(&args),
    }
}
