use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    Io(io::Error),
    Json(serde_json::Error),
    Tensors(safetensors::SafeTensorError),
    Shape(ndarray::ShapeError),
    SizeMismatch {
        what: String,
        got: usize,
        expected: usize,
    },
    InvalidConfig(String),
    UnknownBlob {
        layer: String,
        blob: String,
    },
    /// A solver hook failed, the solve loop was aborted.
    Hook(Box<dyn Error + Send + Sync>),
}

impl MlErr {
    pub(crate) fn size_mismatch(what: impl Into<String>, got: usize, expected: usize) -> Self {
        Self::SizeMismatch {
            what: what.into(),
            got,
            expected,
        }
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::Io(e) => write!(f, "io error: {e}"),
            MlErr::Json(e) => write!(f, "malformed definition: {e}"),
            MlErr::Tensors(e) => write!(f, "malformed tensor file: {e}"),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch for {what}: got {got}, expected {expected}"),
            MlErr::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            MlErr::UnknownBlob { layer, blob } => {
                write!(f, "layer {layer} reads unknown blob {blob}")
            }
            MlErr::Hook(e) => write!(f, "solver aborted: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            MlErr::Json(e) => Some(e),
            MlErr::Tensors(e) => Some(e),
            MlErr::Shape(e) => Some(e),
            MlErr::Hook(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<safetensors::SafeTensorError> for MlErr {
    fn from(value: safetensors::SafeTensorError) -> Self {
        Self::Tensors(value)
    }
}

impl From<ndarray::ShapeError> for MlErr {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape(value)
    }
}
