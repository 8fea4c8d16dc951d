mod cli;
mod commands;
mod logging;
mod run;

use anyhow::Result;
use clap::Parser;
use ragkit_search::AppConfig;

use crate::cli::{Cli, Command};
use crate::commands::{BatchArgs, QueryArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    logging::init(cli.verbose || config.verbose);
    match cli.command {
        Command::Batch {
            input,
            project,
            community_level,
            response_type,
            score,
            output,
        } => {
            let report = commands::batch(
                &config,
                BatchArgs {
                    input,
                    project,
                    community_level,
                    response_type,
                    score,
                    output,
                },
            )?;
            println!("{}", report.display());
            Ok(())
        }
        Command::Query {
            text,
            project,
            method,
            community_level,
            response_type,
            dynamic_community_selection,
            context,
        } => commands::query(
            &config,
            QueryArgs {
                text,
                project,
                method,
                community_level,
                response_type,
                dynamic_community_selection,
                context,
            },
        ),
        Command::Score {
            query,
            reference,
            generated,
        } => commands::score(&config, &query, &reference, &generated),
        Command::Projects => commands::projects(&config),
        Command::Run { config: path } => run::run_from_config(&config, &path),
    }
}
