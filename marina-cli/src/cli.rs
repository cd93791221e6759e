use std::sync::Arc;

use clap::{ArgAction, Args, Parser, Subcommand};
use marina::stream::sink;
use marina::{ContainerEngine, DockerEngine, SinkFactory};

use crate::commands::build::BuildArgs;

/// Build applications inside ephemeral containers and package them as images
#[derive(Parser, Debug)]
#[command(name = "marina", version, author)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an application and package it into a `name:version` image
    Build(BuildArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Increase log verbosity (-v warnings, -vv info, -vvv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Silence logs and container output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl GlobalFlags {
    /// Connect to the local Docker daemon (honours `DOCKER_HOST`).
    pub fn connect_engine(&self) -> anyhow::Result<Arc<dyn ContainerEngine>> {
        let engine = DockerEngine::connect()?;
        Ok(Arc::new(engine))
    }

    /// Where build container output goes.
    pub fn output(&self) -> SinkFactory {
        if self.quiet {
            sink::discard()
        } else {
            sink::console()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_count() {
        let cli = Cli::try_parse_from(["marina", "-vvv", "build", "app"]).unwrap();
        assert_eq!(cli.global.verbose, 3);
        assert!(!cli.global.quiet);

        let cli = Cli::try_parse_from(["marina", "build", "app", "-q"]).unwrap();
        assert!(cli.global.quiet);
    }
}
