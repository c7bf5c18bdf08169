//! Tabsh CLI entry point

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tabsh::ui;
use tabsh::{App, Config};

#[derive(Parser, Debug)]
#[command(name = "tabsh", version, about = "Multi-tab interactive command engine")]
struct Args {
    /// Config file (defaults to ~/.tabsh/config.yml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory the first tab starts in (defaults to the current directory)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// History file override (defaults to ~/.tabsh_history)
    #[arg(long)]
    history_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_or_default()?,
    };
    if args.history_file.is_some() {
        config.history_file = args.history_file.clone();
    }
    log::info!("tabsh v{} starting", env!("CARGO_PKG_VERSION"));

    let mut app = match args.dir {
        Some(dir) => App::with_base(config, dir.canonicalize()?)?,
        None => App::new(config)?,
    };

    ui::run(&mut app)
}
