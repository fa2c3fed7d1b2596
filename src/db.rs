//! The digest store: input digests recorded at previous successful builds,
//! consulted by the hash freshness policy.
//!
//! One JSON record per line, one record per tracked (target, input) pair.
//! Later records win on load, so updates are plain appends.  Unknown fields
//! are ignored, keeping old engines able to read files written by newer ones.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Well-known store location, relative to the working directory.
pub const DB_FILENAME: &str = ".bld_db";

/// The digest of one input as observed when its target last built
/// successfully.  `size` and `mtime` are sentinels: when the current mtime
/// still matches, the stored digest is trusted without rereading the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub target: String,
    pub input: String,
    pub digest: String,
    pub size: u64,
    /// Nanoseconds since the epoch.
    pub mtime: u64,
}

pub fn mtime_nanos(t: SystemTime) -> u64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

pub struct Db {
    /// target -> input -> record, as loaded at open time.  Not updated by
    /// writes: a target's freshness is decided before its own records are
    /// rewritten, so within one run the loaded view stays authoritative.
    records: HashMap<String, HashMap<String, Record>>,
    w: Mutex<File>,
}

impl Db {
    /// Open the store at `path`, creating it if absent.
    pub fn open(path: &Path) -> anyhow::Result<Db> {
        let mut records: HashMap<String, HashMap<String, Record>> = HashMap::new();
        match File::open(path) {
            Ok(f) => {
                for line in BufReader::new(f).lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Record>(&line) {
                        Ok(rec) => {
                            records
                                .entry(rec.target.clone())
                                .or_default()
                                .insert(rec.input.clone(), rec);
                        }
                        Err(err) => {
                            log::warn!("{}: skipping unreadable record: {}", path.display(), err);
                        }
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let w = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Db {
            records,
            w: Mutex::new(w),
        })
    }

    /// The stored input vector for a target, keyed by input name.
    pub fn inputs(&self, target: &str) -> Option<&HashMap<String, Record>> {
        self.records.get(target)
    }

    /// Append the input-digest vector observed at a successful build.
    pub fn write_records(&self, records: &[Record]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for rec in records {
            buf.push_str(&serde_json::to_string(rec)?);
            buf.push('\n');
        }
        let mut w = self.w.lock().unwrap();
        w.write_all(buf.as_bytes())?;
        w.flush()?;
        Ok(())
    }
}
