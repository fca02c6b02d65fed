//! SFS: a userspace FUSE driver for a simple on-disk filesystem.
//!
//! The image is a fixed-size file laid out as four regions (header, root
//! directory, block-allocation table, data blocks); `layout` owns the
//! region offsets and entry codec, `resolver` and `chain` implement path
//! lookup and block-chain management on top of it, `ops` composes those
//! into one handler per filesystem call, and `bridge` adapts those
//! handlers to `fuser`'s `Filesystem` trait.

mod bridge;
mod chain;
mod config;
mod disk;
mod error;
mod layout;
mod ops;
mod path;
mod resolver;

pub use bridge::SfsFuse;
pub use config::Config;
pub use error::SfsError;
pub use ops::Engine;

use fuser::MountOption;
use log::info;

/// Opens the configured image and mounts it at `config.mountpoint`,
/// running the FUSE request loop in the foreground or background per
/// `config.background`.
pub fn run(config: Config) -> Result<(), SfsError> {
    let engine = Engine::open(&config.image, config.allow_second_mkdir_block)?;
    let fs = SfsFuse::new(engine);
    let options = vec![
        MountOption::FSName("sfs".to_string()),
        MountOption::DefaultPermissions,
    ];

    if config.background {
        info!("mounting {:?} at {:?} (background)", config.image, config.mountpoint);
        let session = fuser::spawn_mount2(fs, &config.mountpoint, &options)?;
        // Detach: the caller's process returns while the mount stays live.
        std::mem::forget(session);
        Ok(())
    } else {
        info!("mounting {:?} at {:?}", config.image, config.mountpoint);
        fuser::mount2(fs, &config.mountpoint, &options)?;
        Ok(())
    }
}
