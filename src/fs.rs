//! The small filesystem surface the engine needs: stat, read, unlink.
//! Indirected as a trait so tests can run against an in-memory tree.

use std::time::SystemTime;

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    pub fn exists(&self) -> bool {
        !matches!(self, MTime::Missing)
    }
}

pub trait FileSystem: Sync {
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &str) -> std::io::Result<MTime>;
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>>;
    fn unlink(&self, path: &str) -> std::io::Result<()>;
}

/// Unlink a path, treating "already absent" as success.  Returns whether the
/// path existed.
pub fn unlink_if_exists(fs: &dyn FileSystem, path: &str) -> std::io::Result<bool> {
    match fs.unlink(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub struct RealFileSystem {}

impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl Default for RealFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        Ok(match std::fs::metadata(path) {
            Ok(meta) => MTime::Stamp(meta.modified()?),
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    MTime::Missing
                } else {
                    return Err(err);
                }
            }
        })
    }

    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn unlink(&self, path: &str) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}
