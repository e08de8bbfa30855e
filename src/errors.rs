use std::fmt;

/// Crate-wide error kinds. Transient kinds (TopologyUnavailable,
/// BusUnavailable, MissingFeature) are recovered locally; the rest are
/// surfaced and fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwinError {
    /// Bad CLI arguments or missing input file; fatal at startup.
    Config(String),
    /// Corrupt topology CSV input; fatal at startup.
    TopologyLoad(String),
    /// The topology store cannot be reached; retried with back-off.
    TopologyUnavailable(String),
    /// The simulation kernel reported an error; fatal.
    Kernel(String),
    /// The middleware broker is unreachable; the agent degrades to local mode.
    BusUnavailable(String),
    /// Attempted mutation of a frozen temporal window; programmer error.
    WindowFrozen { window: u64, current: u64 },
    /// A predictor feature row lacks a required field; the predictor is
    /// bypassed for the current window.
    MissingFeature(String),
}

pub type Result<T> = std::result::Result<T, TwinError>;

impl fmt::Display for TwinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwinError::Config(msg) => write!(f, "configuration error: {}", msg),
            TwinError::TopologyLoad(msg) => write!(f, "topology load error: {}", msg),
            TwinError::TopologyUnavailable(msg) => write!(f, "topology unavailable: {}", msg),
            TwinError::Kernel(msg) => write!(f, "simulation kernel error: {}", msg),
            TwinError::BusUnavailable(msg) => write!(f, "middleware unavailable: {}", msg),
            TwinError::WindowFrozen { window, current } => write!(
                f,
                "window {} is frozen (current window is {})",
                window, current
            ),
            TwinError::MissingFeature(name) => write!(f, "missing model feature: {}", name),
        }
    }
}

impl std::error::Error for TwinError {}

impl TwinError {
    /// Process exit code for startup failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            TwinError::Config(_) => 2,
            TwinError::TopologyLoad(_) | TwinError::TopologyUnavailable(_) => 3,
            TwinError::Kernel(_) => 4,
            _ => 1,
        }
    }
}

impl From<csv::Error> for TwinError {
    fn from(err: csv::Error) -> Self {
        TwinError::TopologyLoad(err.to_string())
    }
}

impl From<std::io::Error> for TwinError {
    fn from(err: std::io::Error) -> Self {
        TwinError::Config(err.to_string())
    }
}
