use clap::Parser;
use netgauge::cli::{
    handle_completions, handle_config_check, handle_config_init, Cli, Commands, ConfigCommands,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Watch(args) => netgauge::cli::watch::run_watch(args).await,
        Commands::Probe(args) => netgauge::cli::probe::run_probe(args).await,
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Init(args) => handle_config_init(&args),
            ConfigCommands::Check(args) => handle_config_check(&args),
        },
        Commands::Completions(args) => {
            handle_completions(&args);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
