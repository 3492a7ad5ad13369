// Error types shared by the cache, library, and resolution layers.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("data does not match a dynamic linker cache")]
    NotACache,

    #[error("cache data truncated deserializing {0}")]
    Truncated(&'static str),

    #[error("cache extension section out of range: {0}")]
    BadExtension(&'static str),

    #[error("'{}' is not an ELF object", .0.display())]
    NotElf(PathBuf),

    #[error("could not resolve '{0}' to a shared object")]
    Linking(String),

    #[error("ELF parsing error: {0}")]
    Object(#[from] object::read::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
