use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a processor version within its project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    /// Uploaded and runnable, but not the version serving the project
    Pending,
    /// The version currently serving the project
    Active,
    /// Demoted; its job is torn down and the state is never left again
    Obsolete,
}

impl VersionState {
    /// Check if this is a terminal state (demotion is one-way)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Obsolete)
    }

    /// Check if a processor in this state may own a running job
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Obsolete => write!(f, "obsolete"),
        }
    }
}

impl std::str::FromStr for VersionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "obsolete" => Ok(Self::Obsolete),
            _ => Err(format!("Invalid version state: {s}")),
        }
    }
}

/// Run state reported by a job for a single chain (or for the meta entry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRunState {
    /// Waiting to be scheduled or catching up before processing
    Queuing,
    /// Actively indexing blocks
    Processing,
    /// Failed with a recorded error
    Error,
    /// The job has not reported recently enough to know
    Unknown,
}

impl ChainRunState {
    /// Check if this is an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Check if the chain is making or about to make progress
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Queuing | Self::Processing)
    }
}

impl fmt::Display for ChainRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queuing => write!(f, "queuing"),
            Self::Processing => write!(f, "processing"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for ChainRunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queuing" => Ok(Self::Queuing),
            "processing" => Ok(Self::Processing),
            "error" => Ok(Self::Error),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid chain run state: {s}")),
        }
    }
}

/// Aggregated status of a whole processor, derived from its chain states
/// and the liveness of its job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallState {
    /// No progress reported yet, or the job is not up
    Starting,
    /// The job is alive and no error outranks it
    Processing,
    /// A chain or the driver itself failed
    Error,
    /// Nothing can be said (e.g. an obsolete version with no history)
    Unknown,
}

impl OverallState {
    /// Check if this is an error state
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for OverallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Processing => write!(f, "processing"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for OverallState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "processing" => Ok(Self::Processing),
            "error" => Ok(Self::Error),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid overall state: {s}")),
        }
    }
}

/// Default state for new processor versions
impl Default for VersionState {
    fn default() -> Self {
        Self::Pending
    }
}

/// Default state for chains that have not reported yet
impl Default for ChainRunState {
    fn default() -> Self {
        Self::Queuing
    }
}
