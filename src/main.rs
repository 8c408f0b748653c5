//! jsharness - run JavaScript tests in a headless browser
//!
//! Thin front end over the library: parse flags, load the user config,
//! install logging and hand off to [`jsharness::commands::run`].

use std::sync::Arc;

use clap::Parser;
use jsharness::commands::{self, Cli};
use jsharness::common::config::Config;
use jsharness::common::logging;
use jsharness::fs::{FileSystem, StdFileSystem};
use jsharness::SettingsResolver;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let fs: Arc<dyn FileSystem> = Arc::new(StdFileSystem);
    let settings = Arc::new(SettingsResolver::new(fs.clone()));

    let prepared = Config::load().and_then(|config| {
        let options = cli.options(&config)?;
        Ok((config, options))
    });
    // Settings may ask for a trace file, so they are read before logging starts
    let trace = match &prepared {
        Ok((_, options)) => commands::trace_file(&cli, options, &settings),
        Err(_) => cli.trace.clone(),
    };
    let guard = logging::init_cli(trace.as_deref());

    let result = match prepared {
        Ok((config, options)) => commands::run(&cli, &config, &options, fs, settings).await,
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("Error: {e}");
            2
        }
    };
    // Flush the trace file before exiting
    drop(guard);
    std::process::exit(code);
}
