use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use caching_proxy::Proxy;

#[derive(Parser, Debug)]
#[command(name = "caching-proxy", version)]
#[command(about = "Caching HTTP reverse proxy", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Reload virtual hosts when the configuration file changes.
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match Proxy::load_and_run(&args.config, args.watch).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("caching-proxy: {}", e);
            ExitCode::FAILURE
        }
    }
}
