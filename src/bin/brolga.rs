extern crate brolga;

#[macro_use]
extern crate log;
use env_logger::Builder;
use log::LevelFilter;

use std::env;
use std::process;
use std::time::Instant;

use brolga::cli::PhaseParams;
use brolga::phase::PhaseDriver;
use brolga::utils::PhaseError;

fn main() {
    set_log_level();
    let args: Vec<String> = env::args().skip(1).collect();
    let params = match PhaseParams::parse(&args) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let nthreads = if params.nthreads > 0 {
        params.nthreads
    } else {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    };
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(nthreads)
        .build_global()
    {
        eprintln!("failed to build thread pool: {}", e);
        process::exit(1);
    }
    info!("brolga version {}", env!("CARGO_PKG_VERSION"));
    info!("using {} threads", nthreads);

    let start = Instant::now();
    match PhaseDriver::run(&params) {
        Ok(()) => {
            info!("finished in {:.1?}", start.elapsed());
        }
        Err(e) => {
            // one-line diagnostic, nonzero exit for every error kind
            match &e {
                PhaseError::Usage(_) => eprintln!("{}", e),
                _ => eprintln!("brolga: {}", e),
            }
            process::exit(1);
        }
    }
}

fn set_log_level() {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    if builder.try_init().is_err() {
        panic!("failed to initialise the logger - was it set more than once?")
    }
}
