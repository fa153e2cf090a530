//! `completions` and `version` commands.

use clap::CommandFactory;
use serde_json::json;

use crate::cli::args::{Cli, CompletionsArgs, OutputFormat, VersionArgs};
use crate::error::StallgateError;

/// Build-time metadata generated by `built`.
#[allow(dead_code, clippy::doc_markdown, clippy::needless_raw_string_hashes)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Generate and print a shell completion script to stdout.
pub fn completions(args: &CompletionsArgs) {
    let mut cmd = Cli::command();
    clap_complete::generate(args.shell, &mut cmd, "stallgate", &mut std::io::stdout());
}

/// Print version and build information.
///
/// # Errors
///
/// Returns a JSON error if the JSON document cannot be rendered.
pub fn version(args: &VersionArgs) -> Result<(), StallgateError> {
    let commit = built_info::GIT_COMMIT_HASH_SHORT.unwrap_or("unknown");

    match args.format {
        OutputFormat::Human => {
            println!("{} {}", built_info::PKG_NAME, built_info::PKG_VERSION);
            println!("commit:  {commit}");
            println!("built:   {}", built_info::BUILT_TIME_UTC);
            println!("rustc:   {}", built_info::RUSTC_VERSION);
            println!("target:  {}", built_info::TARGET);
            println!("profile: {}", built_info::PROFILE);
        }
        OutputFormat::Json => {
            let doc = json!({
                "name": built_info::PKG_NAME,
                "version": built_info::PKG_VERSION,
                "commit": commit,
                "built": built_info::BUILT_TIME_UTC,
                "rustc": built_info::RUSTC_VERSION,
                "target": built_info::TARGET,
                "profile": built_info::PROFILE,
            });
            println!("{}", serde_json::to_string(&doc)?);
        }
    }
    Ok(())
}
