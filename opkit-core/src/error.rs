use thiserror::Error;

/// Errors raised by the client-less parts of opkit
#[derive(Error, Debug)]
pub enum Error {
    /// An object is missing its `apiVersion` or `kind`
    #[error("object {0} has no type information")]
    MissingTypeMeta(String),

    /// The `apiVersion` of an object could not be split into group and version
    #[error("failed to parse api version: {0}")]
    InvalidApiVersion(String),

    /// Two objects compared for equality are not of the same group, version and kind
    #[error("type mismatch when comparing {desired} against {actual}")]
    KindMismatch {
        /// Type of the desired object
        desired: String,
        /// Type of the live object
        actual: String,
    },

    /// Converting between a typed object and its json representation failed
    #[error("unable to convert object: {0}")]
    Conversion(#[source] serde_json::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Conversion(err)
    }
}
