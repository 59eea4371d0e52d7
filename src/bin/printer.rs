//! Printer binary.

use clap::Parser;
use distmutex::{logging, printer::Printer};
use std::sync::Arc;
use tracing::metadata::LevelFilter;

#[derive(Parser)]
struct Opts {
    /// Port to listen for START/STOP on.
    #[clap(long, default_value_t = 5001)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    logging::init_tracing("printer", LevelFilter::INFO)?;

    let printer = Arc::new(Printer::new(opts.port));
    printer.run().await
}
