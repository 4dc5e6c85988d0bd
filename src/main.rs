use std::process;

use clap::Parser;
use log::{error, info};

use moodnotes::{App, Cli, Config, Result};

pub fn initialize_logger(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .format_module_path(true)
        .init();

    info!("Logger initialized");
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_or_init(&config_path)?;

    let mut app = App::new(config, config_path, cli.user, cli.verbose)?;
    app.run(cli.command).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    initialize_logger(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("{} {}", console::style("error:").red().bold(), e);
        process::exit(1);
    }
}
