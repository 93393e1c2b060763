use std::backtrace::Backtrace;
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The store's universal infeasibility signal.
///
/// Raised whenever a propagation step or a clone step would wipe out a
/// variable's domain. It is expected control flow during search: the nearest
/// caller that opened a store level catches it, removes the level, and treats
/// the branch as infeasible. It must never escape past a
/// [`Store::consistency`](crate::solver::store::Store::consistency) or
/// `clone_into` boundary without being converted into a boolean or optional
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a variable's domain was wiped out")]
pub struct Fail;

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("parameter `{0}` is neither a known variable nor a valid integer constant")]
    UnknownParameter(String),

    #[error("unrecognized token `{0}` in predicate expression")]
    UnknownToken(String),

    #[error("malformed predicate expression: {0}")]
    MalformedExpression(String),

    #[error("malformed relation: {0}")]
    MalformedRelation(String),

    #[error("malformed parameters for global constraint `{reference}`: {detail}")]
    MalformedGlobal { reference: String, detail: String },

    #[error("the global constraint `{0}` is not supported")]
    UnsupportedGlobal(String),

    #[error("all variables of a space must be projected in the same direction")]
    MixedProjectionDirections,

    #[error("{0}")]
    Custom(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Inner: {inner}\n{backtrace}")]
    Inner {
        inner: Box<SolverError>,
        backtrace: Box<Backtrace>,
    },
}

impl From<SolverError> for Error {
    fn from(inner: SolverError) -> Self {
        Error::Inner {
            inner: Box::new(inner),
            backtrace: Box::new(std::backtrace::Backtrace::capture()),
        }
    }
}

impl Error {
    /// The underlying solver error, without the captured backtrace.
    pub fn inner(&self) -> &SolverError {
        match self {
            Error::Inner { inner, .. } => inner,
        }
    }
}
