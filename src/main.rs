//! Stencil CLI entry point
//!
//! Parses arguments, runs the selected command and prints errors with
//! suggestions before exiting with a non-zero status.

use anyhow::Result;
use clap::Parser;
use stencil::cli;
use stencil::core::user_friendly_error;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute() {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
