mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use fits_figure::FigureOptions;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let file_options = match &cli.config {
        Some(path) => FigureOptions::from_json_file(path)?,
        None => FigureOptions::default(),
    };

    match cli.command {
        Commands::Render {
            fits,
            output,
            figure,
            scale,
            overlays,
        } => {
            commands::render_figure(
                &fits,
                output,
                figure.apply(file_options),
                figure.transparent,
                &scale,
                &overlays,
            )?;
        }
        Commands::Info { fits, hdu, format } => {
            commands::show_info(&fits, hdu, &format)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
