//! Orchestrator binary.

use clap::Parser;
use distmutex::{config::PrinterAddr, logging, orchestrator::Orchestrator};
use std::sync::Arc;
use tracing::metadata::LevelFilter;

#[derive(Parser)]
struct Opts {
    /// Port to listen for node ENTER/EXIT sessions on.
    #[clap(long, default_value_t = 5000)]
    port: u16,

    /// Host of the Printer service.
    #[clap(long, default_value = "127.0.0.1")]
    printer_host: String,

    /// Port of the Printer service.
    #[clap(long, default_value_t = 5001)]
    printer_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    logging::init_tracing("orchestrator", LevelFilter::INFO)?;

    let printer_addr = PrinterAddr {
        host: opts.printer_host,
        port: opts.printer_port,
    };
    let orchestrator = Arc::new(Orchestrator::new(opts.port, printer_addr));
    orchestrator.run().await
}
