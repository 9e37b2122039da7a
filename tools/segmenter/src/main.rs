//! 肺结节分割命令行程序.

use clap::Parser;
use std::process::ExitCode;

mod args;
mod runner;

fn main() -> ExitCode {
    let args = args::Args::parse();
    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    if let Err(e) = simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
    {
        eprintln!("cannot install logger: {e}");
    }

    match runner::run(&args) {
        Ok(code) => code.into(),
        Err(e) => {
            log::error!("{e}");
            runner::Outcome::Failed.into()
        }
    }
}
