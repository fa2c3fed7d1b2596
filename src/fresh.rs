//! The freshness oracle: per target, decide whether the action may be
//! skipped.
//!
//! Two policies.  Mtime: every output exists and the oldest output is no
//! older than the newest input; equal timestamps count as fresh, since 1s
//! resolution filesystems would otherwise rebuild forever.  Hash: every
//! output exists and the current input-digest vector equals the vector
//! recorded at the last successful build of this target.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::db::{mtime_nanos, Db, Record};
use crate::error::{BuildError, Result};
use crate::fs::{FileSystem, MTime};
use crate::graph::{FileTarget, Graph, Lookup, Target};

/// Outcome of a freshness check.
#[derive(Debug)]
pub enum Freshness {
    /// The action may be skipped.  `refresh` carries records whose mtime
    /// sentinel went stale while the content did not; appending them spares
    /// the next run the rehash.
    Fresh { refresh: Vec<Record> },
    /// The action must run.  For hash-policy targets `records` is the
    /// current input-digest vector, persisted after the action succeeds.
    Stale { records: Vec<Record> },
}

struct CachedDigest {
    mtime: u64,
    size: u64,
    digest: String,
}

/// Shared by all workers for one run.  Digests are computed at most once per
/// input even when many targets share it.
pub struct Oracle<'a> {
    graph: &'a Graph,
    fs: &'a dyn FileSystem,
    db: Option<&'a Db>,
    cache: Mutex<HashMap<String, CachedDigest>>,
}

impl<'a> Oracle<'a> {
    pub fn new(graph: &'a Graph, fs: &'a dyn FileSystem, db: Option<&'a Db>) -> Self {
        Oracle {
            graph,
            fs,
            db,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Phony dependencies have no on-disk state; they contribute ordering
    /// and dirtiness propagation (handled by the executor), not timestamps
    /// or digests.
    fn is_phony(&self, name: &str) -> bool {
        match self.graph.lookup(name) {
            Lookup::Target(id) => matches!(self.graph.target(id), Target::Phony(_)),
            _ => false,
        }
    }

    /// Decide freshness for a file target.  `use_hash` is the already
    /// resolved policy for this target.
    pub fn check(&self, target: &FileTarget, use_hash: bool) -> Result<Freshness> {
        if use_hash {
            self.check_hash(target)
        } else {
            self.check_mtime(target)
        }
    }

    fn stat(&self, target: &FileTarget, path: &str) -> Result<MTime> {
        self.fs.stat(path).map_err(|err| BuildError::ActionFailed {
            target: target.ts[0].clone(),
            reason: format!("stat {path:?}: {err}"),
        })
    }

    fn check_mtime(&self, target: &FileTarget) -> Result<Freshness> {
        let mut oldest_out: Option<SystemTime> = None;
        for t in &target.ts {
            match self.stat(target, t)? {
                MTime::Missing => return Ok(Freshness::Stale { records: vec![] }),
                MTime::Stamp(m) => {
                    oldest_out = Some(match oldest_out {
                        Some(prev) => prev.min(m),
                        None => m,
                    });
                }
            }
        }
        let oldest_out = oldest_out.unwrap();

        for d in unique(&target.ds) {
            if self.is_phony(d) {
                continue;
            }
            match self.stat(target, d)? {
                MTime::Missing => return Err(BuildError::MissingInput(d.to_owned())),
                MTime::Stamp(m) => {
                    if m > oldest_out {
                        return Ok(Freshness::Stale { records: vec![] });
                    }
                }
            }
        }
        Ok(Freshness::Fresh { refresh: vec![] })
    }

    fn check_hash(&self, target: &FileTarget) -> Result<Freshness> {
        let primary = &target.ts[0];
        let stored = self.db.and_then(|db| db.inputs(primary));

        let mut outputs_exist = true;
        for t in &target.ts {
            if !self.stat(target, t)?.exists() {
                outputs_exist = false;
                break;
            }
        }

        // Compute the full current vector even when staleness is already
        // known: it becomes the store update after the action succeeds.
        let mut records = Vec::new();
        let mut matches = true;
        let mut refresh = Vec::new();
        let inputs: Vec<&str> = unique(&target.ds)
            .filter(|d| !self.is_phony(d))
            .collect();
        for d in &inputs {
            let stored_rec = stored.and_then(|m| m.get(*d));
            let cur = self.digest_of(target, d, stored_rec)?;
            match stored_rec {
                Some(rec) if rec.digest == cur.digest => {
                    if rec.mtime != cur.mtime {
                        // Content unchanged under a new mtime: refresh the
                        // sentinel so the next run skips the reread.
                        refresh.push(record(primary, d, &cur));
                    }
                }
                _ => matches = false,
            }
            records.push(record(primary, d, &cur));
        }

        // An absent entry counts as the empty vector, so an input-less
        // target is fresh once its outputs exist.
        let same_vector = matches && stored.map(|m| m.len()).unwrap_or(0) == inputs.len();
        if outputs_exist && same_vector {
            Ok(Freshness::Fresh { refresh })
        } else {
            Ok(Freshness::Stale { records })
        }
    }

    /// Current digest of one input, served from the per-run cache when
    /// possible, and from the stored sentinel without rereading when the
    /// mtime still matches.
    fn digest_of(
        &self,
        target: &FileTarget,
        path: &str,
        stored: Option<&Record>,
    ) -> Result<DigestInfo> {
        let mtime = match self.stat(target, path)? {
            MTime::Missing => return Err(BuildError::MissingInput(path.to_owned())),
            MTime::Stamp(m) => mtime_nanos(m),
        };

        let mut cache = self.cache.lock().unwrap();
        if let Some(hit) = cache.get(path) {
            if hit.mtime == mtime {
                return Ok(DigestInfo {
                    digest: hit.digest.clone(),
                    size: hit.size,
                    mtime,
                });
            }
        }

        if let Some(rec) = stored {
            if rec.mtime == mtime {
                cache.insert(
                    path.to_owned(),
                    CachedDigest {
                        mtime,
                        size: rec.size,
                        digest: rec.digest.clone(),
                    },
                );
                return Ok(DigestInfo {
                    digest: rec.digest.clone(),
                    size: rec.size,
                    mtime,
                });
            }
        }
        drop(cache);

        let bytes = self.fs.read(path).map_err(|err| BuildError::ActionFailed {
            target: target.ts[0].clone(),
            reason: format!("read {path:?}: {err}"),
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let info = DigestInfo {
            digest: digest.clone(),
            size: bytes.len() as u64,
            mtime,
        };
        self.cache.lock().unwrap().insert(
            path.to_owned(),
            CachedDigest {
                mtime,
                size: info.size,
                digest,
            },
        );
        Ok(info)
    }
}

struct DigestInfo {
    digest: String,
    size: u64,
    mtime: u64,
}

fn record(target: &str, input: &str, info: &DigestInfo) -> Record {
    Record {
        target: target.to_owned(),
        input: input.to_owned(),
        digest: info.digest.clone(),
        size: info.size,
        mtime: info.mtime,
    }
}

/// Inputs in declaration order with repeats dropped.
fn unique(names: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = std::collections::HashSet::new();
    names
        .iter()
        .map(|s| s.as_str())
        .filter(move |s| seen.insert(*s))
}
