// src/main.rs

use anyhow::Result;
use clap::Parser;
use legacy2git::cli::{self, Cli, Commands};
use legacy2git::telemetry;
use std::time::Instant;

fn main() -> Result<()> {
    let args = Cli::parse();
    let start_time = Instant::now();

    match args.command {
        Commands::Init(init) => cli::run_init(init),
        Commands::Migrate(migrate) => {
            let config = migrate.resolve()?;
            let _telemetry = telemetry::init(config.log_file.as_deref(), args.verbose)?;
            let result = cli::run_migrate(config);
            println!("Total time: {:.2?}", start_time.elapsed());
            result
        }
    }
}
