mod cli;
mod config;
mod inspect;
mod remux;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "atomkit=trace,atomkit_media=trace".to_string()
        } else {
            "atomkit=info,atomkit_media=warn".to_string()
        }
    });

    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { file, tree } => inspect::inspect_file(&file, tree),
        Commands::Remux { input, output } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            tracing::debug!("Muxer config: {:?}", config.muxer);

            let stats = remux::remux_file(&input, &output, &config.muxer)?;
            println!(
                "Wrote {} ({} tracks, {} samples, {} bytes of media)",
                output.display(),
                stats.tracks,
                stats.samples,
                stats.bytes
            );
            if stats.skipped_tracks > 0 {
                println!("Skipped {} unsupported track(s)", stats.skipped_tracks);
            }
            Ok(())
        }
    }
}
