mod cli;
mod engine;
mod logging;
mod model;
mod orchestrator;
mod storage;
mod text_summary;
mod upload;

use anyhow::{Context, Result};
use clap::Parser;

fn main() -> Result<()> {
    // Needs a single-threaded process, so it runs before the runtime exists.
    text_summary::capture_local_offset();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")?
        .block_on(run_main())
}

async fn run_main() -> Result<()> {
    logging::init_tracing();
    let args = cli::Cli::parse();
    let is_silent = args.silent;

    match cli::run(args).await {
        Ok(0) => Ok(()),
        // Aborted or failed requests have already been reported.
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
