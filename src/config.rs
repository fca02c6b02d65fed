//! Command-line configuration.
//!
//! A `Config` value is parsed once in `main` and threaded by value into
//! the engine and the callback binding, rather than read back out of a
//! global mutable record. Built with `clap`'s derive API.

use std::path::PathBuf;

use clap::Parser;

/// `sfs-fuse` mounts a single SFS image at a directory.
#[derive(Parser, Debug)]
#[command(name = "sfs-fuse", version, about)]
pub struct Config {
    /// Path to the SFS image file to mount.
    #[arg(short = 'i', long = "img", default_value = "test.img")]
    pub image: PathBuf,

    /// Directory to mount the filesystem at.
    pub mountpoint: PathBuf,

    /// Run the FUSE loop in the background instead of foreground.
    #[arg(short = 'b', long = "background")]
    pub background: bool,

    /// Raise the log filter to `debug` (overridden by `RUST_LOG`).
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Whether `mkdir` allocates a second, unused slack block per new
    /// directory in addition to the one block its entry array needs.
    /// Defaults to `true` so existing images keep that slack block.
    #[arg(long = "allow-second-mkdir-block", default_value_t = true)]
    pub allow_second_mkdir_block: bool,
}
