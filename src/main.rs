use clap::Parser;
use log::error;

use sfs::Config;

fn main() {
    let config = Config::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if config.verbose && std::env::var("RUST_LOG").is_err() {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    if let Err(e) = sfs::run(config) {
        error!("sfs-fuse: {e}");
        std::process::exit(1);
    }
}
