//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`], [`init`], [`validate`], [`health`] or
//! `logs`. Each handler lives in its own submodule.

pub mod health;
pub mod init;
#[cfg(feature = "sqlite")]
pub mod logs;
pub mod run;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::TapwireError;

pub async fn dispatch(cli: Cli) -> Result<(), TapwireError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Init(ref args)) => init::execute(args),
        Some(Commands::Validate(ref args)) => validate::execute(args),
        Some(Commands::Health(args)) => health::execute(args).await,
        #[cfg(feature = "sqlite")]
        Some(Commands::Logs(args)) => logs::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  tapwire v{version}: streaming reverse proxy with exchange recording\n\n  \
         No command provided. To get started:\n\n    \
         tapwire init                  Generate a starter config\n    \
         tapwire run                   Start the proxy (auto-detects ./tapwire.yaml)\n    \
         tapwire run -c routes.yaml    Start with a specific config file\n    \
         tapwire --help                See all commands and options\n"
    );
}
