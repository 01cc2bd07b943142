use crate::store::StoreError;
use thiserror::Error;

/// Errors raised while reconciling a workload
#[derive(Error, Debug)]
pub enum Error {
    /// A call to the object store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A client-less operation failed, typically a malformed object
    #[error(transparent)]
    Core(#[from] opkit_core::Error),

    /// An object could not be converted to or from its typed form
    #[error("unable to convert {kind} object: {source}")]
    Conversion {
        /// Kind of the object being converted
        kind: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// A phase returned an error
    #[error("unable to complete {phase} phase for {kind}, {source}")]
    Phase {
        /// Name of the phase
        phase: String,
        /// Kind of the workload
        kind: String,
        /// Error returned by the phase
        #[source]
        source: Box<Error>,
    },

    /// Writing the status after a failed phase failed as well
    #[error("failed to update status conditions; {update}; {phase}")]
    StatusUpdate {
        /// Error from the status write
        update: Box<Error>,
        /// Error returned by the phase
        #[source]
        phase: Box<Error>,
    },

    /// An operation on a named object failed
    #[error("{action} {name}, {source}")]
    Resource {
        /// What was attempted, e.g. `unable to create resource`
        action: &'static str,
        /// `Kind/name` of the object
        name: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },

    /// A child cannot be owned by a workload that has not been stored yet
    #[error("unable to set owner reference on {0}, workload has no uid")]
    OwnerReference(String),

    /// A child is already controlled by another owner
    #[error("{object} is already owned by {owner}")]
    AlreadyOwned {
        /// `Kind/name` of the child
        object: String,
        /// `Kind/name` of the controller holding it
        owner: String,
    },

    /// A completed job did not succeed exactly once
    #[error("job {0} was not successful")]
    JobFailed(String),

    /// `status.created` of a dependency holds something other than a bool
    #[error("unable to retrieve status.created field of {kind} {name}: expected a bool")]
    DependencyStatus {
        /// Kind of the dependency
        kind: String,
        /// Name of the dependency instance
        name: String,
    },

    /// The readiness annotation holds an expression that cannot be parsed
    #[error("invalid readiness path {path:?}: {reason}")]
    ReadyPath {
        /// The expression as written on the object
        path: String,
        /// Parser message
        reason: String,
    },

    /// An operator supplied hook failed
    #[error("{0}")]
    Hook(String),

    /// The reconcile was cancelled before a store call completed
    #[error("reconcile cancelled")]
    Cancelled,

    /// A resource did not become ready before the poll timeout
    #[error("timed out waiting for {0} to become ready")]
    Timeout(String),
}

impl Error {
    /// Whether the error is, or wraps, an optimistic concurrency conflict
    ///
    /// Conflicts mean the object changed between read and write. They are retried on the next
    /// reconcile and never reported as a failure.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Store(err) => err.is_conflict(),
            Error::Phase { source, .. } | Error::Resource { source, .. } => source.is_conflict(),
            Error::StatusUpdate { phase, .. } => phase.is_conflict(),
            _ => false,
        }
    }

    /// Wrap an error from an operator hook
    pub fn hook(err: impl std::fmt::Display) -> Self {
        Error::Hook(err.to_string())
    }

    pub(crate) fn resource(action: &'static str, name: String, source: impl Into<Error>) -> Self {
        Error::Resource {
            action,
            name,
            source: Box::new(source.into()),
        }
    }
}

/// Convient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> Error {
        Error::Store(StoreError::Conflict("configmaps \"web\"".into()))
    }

    #[test]
    fn conflicts_are_found_through_wrappers() {
        let wrapped = Error::Phase {
            phase: "CreateResources".into(),
            kind: "WebStore".into(),
            source: Box::new(Error::resource("unable to update resource", "ConfigMap/web".into(), conflict())),
        };
        assert!(wrapped.is_conflict());
        assert!(!Error::JobFailed("migrate".into()).is_conflict());
        assert!(!Error::Cancelled.is_conflict());
    }

    #[test]
    fn phase_errors_carry_context() {
        let err = Error::Phase {
            phase: "CheckReady".into(),
            kind: "WebStore".into(),
            source: Box::new(Error::JobFailed("migrate".into())),
        };
        assert_eq!(
            err.to_string(),
            "unable to complete CheckReady phase for WebStore, job migrate was not successful"
        );
    }

    #[test]
    fn status_update_failures_are_concatenated() {
        let err = Error::StatusUpdate {
            update: Box::new(Error::Hook("status subresource unavailable".into())),
            phase: Box::new(Error::JobFailed("migrate".into())),
        };
        assert_eq!(
            err.to_string(),
            "failed to update status conditions; status subresource unavailable; job migrate was not successful"
        );
    }
}
