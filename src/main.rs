use std::path::PathBuf;

use clap::Parser;

use dirwatch::cli::commands::{init, watch};
use dirwatch::cli::{Cli, Commands};
use dirwatch::config::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        // Init must not depend on an existing configuration
        Commands::Init { force } => init::run_init(force),
        command => run(command, cli.config).await,
    }
}

async fn run(command: Commands, config: Option<PathBuf>) {
    let config_path = config.or_else(Settings::find_workspace_config);
    let settings = match &config_path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    dirwatch::logging::init_with_config(&settings.logging);

    match command {
        Commands::Config => init::run_config(&settings),

        Commands::Watch {
            path,
            depth,
            kinds,
            json,
        } => {
            let args = watch::WatchArgs {
                path,
                depth,
                kinds,
                json,
                toggle_file: config_path,
            };
            if let Err(e) = watch::run_watch(args, &settings).await {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }

        Commands::Init { force } => init::run_init(force),
    }
}
