//! Error taxonomy.  Registration and resolution errors are fatal; execution
//! errors fail one target and propagate via cancellation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Two rules claim the same output name, or a phony collides with a
    /// file output.
    #[error("duplicate target {0:?}")]
    DuplicateTarget(String),

    /// Malformed registration: empty output list, empty name, an output
    /// repeated within one rule, and the like.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The reachable subgraph contains a cycle; the path is the on-stack
    /// chain that closed it.
    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// A dependency names neither a registered target nor a file on disk.
    #[error("no rule to make {0:?} and it does not exist")]
    MissingInput(String),

    /// A requested goal is not a registered target.
    #[error("unknown goal {0:?}")]
    UnknownGoal(String),

    /// The action returned an error, or engine I/O on the target's behalf
    /// failed.
    #[error("{target}: {reason}")]
    ActionFailed { target: String, reason: String },

    /// The action reported success but a declared output is absent.
    #[error("{target}: action succeeded but output {output:?} is missing")]
    OutputMissing { target: String, output: String },
}

impl BuildError {
    /// Process exit code for the driver: 1 execution, 2 registration/usage,
    /// 3 resolution.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::ActionFailed { .. } | BuildError::OutputMissing { .. } => 1,
            BuildError::DuplicateTarget(_) | BuildError::BadArgument(_) => 2,
            BuildError::Cycle { .. }
            | BuildError::MissingInput(_)
            | BuildError::UnknownGoal(_) => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
