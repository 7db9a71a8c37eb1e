use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::error;

use rsprovision::cli::{Cli, Commands};
use rsprovision::error::exit_code;
use rsprovision::executor::RealCommandExecutor;
use rsprovision::{init_logging, privilege, run_apply, run_check, run_list};

fn run(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Apply(opts) => {
            init_logging(opts.common.log_level)?;
            if !opts.dry_run {
                privilege::require_root()?;
            }
            run_apply(opts, Arc::new(RealCommandExecutor))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check(opts) => {
            init_logging(opts.common.log_level)?;
            let satisfied = run_check(opts, Arc::new(RealCommandExecutor))?;
            Ok(if satisfied {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::List => {
            run_list(&mut std::io::stdout().lock())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions(opts) => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(opts.shell, &mut cmd, name, &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            // Errors before logging is initialised would otherwise be lost.
            if !tracing::dispatcher::has_been_set() {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::from(exit_code(&e))
        }
    }
}
