// Crate-wide error type.
//
// Every fallible core API returns `Result<_, Error>`. Errors surface at
// task boundaries: a task either produces all of its records or none.

use std::fmt;
use std::io;

/// Errors surfaced by the graph, engine, and pipeline layers.
#[derive(Debug)]
pub enum Error {
    /// Malformed graph file, missing section, duplicate node id, unknown
    /// graph label, bad region string, unparseable variant record.
    InvalidInput(String),

    /// Read/write failure on a collaborator stream.
    Io(io::Error),

    /// The engine cannot guarantee non-saturation with the requested
    /// scoring and read length at the chosen cell width.
    SaturationRisk(String),

    /// A predecessor was encountered whose seed is not yet computed,
    /// i.e. the graph is not in topological order.
    MalformedGraph(String),

    /// Overlapping variant clusters that were not pre-merged upstream.
    Unsupported(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::SaturationRisk(msg) => write!(f, "saturation risk: {}", msg),
            Error::MalformedGraph(msg) => write!(f, "malformed graph: {}", msg),
            Error::Unsupported(msg) => write!(f, "unsupported: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let err = Error::InvalidInput("bad region".to_string());
        assert_eq!(format!("{}", err), "invalid input: bad region");

        let err = Error::MalformedGraph("node 3".to_string());
        assert!(format!("{}", err).starts_with("malformed graph"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        match err {
            Error::Io(_) => {}
            other => panic!("expected Io, got {:?}", other),
        }
    }
}
