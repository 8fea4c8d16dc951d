use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ragkit", version, about = "Batch query testing for GraphRAG projects")]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every query of a workbook against one project.
    Batch {
        input: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long)]
        community_level: Option<u32>,
        #[arg(long)]
        response_type: Option<String>,
        #[arg(long, default_value_t = false)]
        score: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Ask a single question.
    Query {
        text: String,
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "local")]
        method: String,
        #[arg(long)]
        community_level: Option<u32>,
        #[arg(long)]
        response_type: Option<String>,
        #[arg(long, default_value_t = false)]
        dynamic_community_selection: bool,
        #[arg(long, default_value_t = false)]
        context: bool,
    },
    /// Grade one generated answer against a reference.
    Score {
        #[arg(long)]
        query: String,
        #[arg(long)]
        reference: String,
        #[arg(long)]
        generated: String,
    },
    Projects,
    Run {
        #[arg(long, default_value = "ragkit.yaml")]
        config: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_batch_flags() {
        let cli = Cli::parse_from([
            "ragkit",
            "--verbose",
            "batch",
            "questions.xlsx",
            "--project",
            "demo",
            "--community-level",
            "3",
            "--score",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Batch {
                input,
                project,
                community_level,
                response_type,
                score,
                output,
            } => {
                assert_eq!(input, PathBuf::from("questions.xlsx"));
                assert_eq!(project, "demo");
                assert_eq!(community_level, Some(3));
                assert_eq!(response_type, None);
                assert!(score);
                assert_eq!(output, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_config_has_default_path() {
        let cli = Cli::parse_from(["ragkit", "run"]);
        assert!(matches!(cli.command, Command::Run { config } if config == PathBuf::from("ragkit.yaml")));
    }
}
