//! Command line program for running parameter sweeps over external
//! simulators.

#[macro_use]
extern crate log;

extern crate anyhow;
extern crate clap;
extern crate colored;

extern crate sweep_core as sweep;

pub mod cli;
mod report;

fn main() {
    // Run the program based on user input
    let code = cli::finish(cli::start(cli::app_matches()));
    std::process::exit(code);
}
