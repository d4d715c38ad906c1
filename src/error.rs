use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while building beams and lattices or
/// tracking through them. None of these are transient: they point at a
/// bad configuration or a programming error and are never retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{element} cannot track a beam of type {beam}")]
    InvalidType {
        element: &'static str,
        beam: &'static str,
    },
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("batch shapes {0:?} are not mutually broadcastable")]
    IncompatibleBatch(Vec<Vec<usize>>),
    #[error("unsupported element kind `{0}`")]
    UnsupportedElement(String),
    #[error("{0} requires a beam interchange adapter, but none is configured")]
    MissingOptionalDependency(String),
    #[error("invalid parameter `{name}` for {element}: {reason}")]
    InvalidParameter {
        element: String,
        name: String,
        reason: String,
    },
    #[error("{0} has no first-order transfer map")]
    NotLinear(String),
}

pub(crate) fn shape(msg: impl Into<String>) -> Error {
    Error::InvalidShape(msg.into())
}

pub(crate) fn parameter(
    element: impl Into<String>,
    name: impl Into<String>,
    reason: impl Into<String>,
) -> Error {
    Error::InvalidParameter {
        element: element.into(),
        name: name.into(),
        reason: reason.into(),
    }
}
