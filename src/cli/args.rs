//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::watcher::EventKind;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser)]
#[command(
    name = "dirwatch",
    version,
    about = "Watch a directory tree and print every change",
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Settings file to use instead of the workspace .dirwatch/settings.toml
    #[arg(long, global = true, env = "DIRWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Watch a directory and its subdirectories
    Watch {
        /// Directory to watch
        path: PathBuf,

        /// How many levels below PATH to watch (defaults to watch.default_depth)
        #[arg(short, long, allow_negative_numbers = true)]
        depth: Option<i32>,

        /// Event kinds to report, comma separated
        #[arg(
            short,
            long,
            value_delimiter = ',',
            default_value = "create,delete,modify"
        )]
        kinds: Vec<EventKind>,

        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
    },

    /// Display active settings
    Config,

    /// Create .dirwatch/settings.toml in the current directory
    Init {
        /// Overwrite an existing settings file
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_parses_kinds_and_depth() {
        let cli = Cli::parse_from([
            "dirwatch",
            "watch",
            "/tmp",
            "--depth",
            "-1",
            "--kinds",
            "create,overflow",
        ]);

        match cli.command {
            Commands::Watch { path, depth, kinds, json } => {
                assert_eq!(path, PathBuf::from("/tmp"));
                assert_eq!(depth, Some(-1));
                assert_eq!(kinds, vec![EventKind::Create, EventKind::Overflow]);
                assert!(!json);
            }
            _ => panic!("expected watch command"),
        }
    }

    #[test]
    fn test_watch_default_kinds() {
        let cli = Cli::parse_from(["dirwatch", "watch", "."]);
        match cli.command {
            Commands::Watch { kinds, depth, .. } => {
                assert_eq!(
                    kinds,
                    vec![EventKind::Create, EventKind::Delete, EventKind::Modify]
                );
                assert_eq!(depth, None);
            }
            _ => panic!("expected watch command"),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(Cli::try_parse_from(["dirwatch", "watch", ".", "--kinds", "rename"]).is_err());
    }
}
