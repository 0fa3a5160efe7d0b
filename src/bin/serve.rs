//! Serves a scrape output directory for browsing.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin serve -- out          # Port 8080
//! cargo run --bin serve -- out 3000     # Custom port
//! ```

use std::{error::Error, path::PathBuf};

use clap::Parser;
use hermitage_scrape::{serve, telemetry};

#[derive(Parser, Debug)]
#[command(version, about = "Serve scraped records over HTTP")]
struct Args {
    /// Output directory of a previous scrape
    #[arg(default_value = "out")]
    dir: PathBuf,

    #[arg(default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    telemetry::init("info");

    serve(&args.dir, args.port).await
}
