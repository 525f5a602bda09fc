use std::path::PathBuf;
use thiserror::Error;

/// Everything that can abort a DESIGNER run.
#[derive(Error, Debug)]
pub enum DesignerError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot find {0} in PATH, please make sure it is installed and on your PATH")]
    ToolNotFound(String),

    #[error("failed to launch {program}: {source}")]
    ToolSpawn {
        program: String,
        source: std::io::Error,
    },

    #[error("command failed with exit code {code:?}: {command}")]
    ToolFailed { command: String, code: Option<i32> },

    #[error("unexpected output from `{command}`: {output:?}")]
    UnexpectedToolOutput { command: String, output: String },

    #[error("missing gradient file {}", .0.display())]
    MissingGradientTable(PathBuf),

    #[error("invalid gradient file {}: {reason}", .path.display())]
    InvalidGradientFile { path: PathBuf, reason: String },

    #[error("No diffusion gradient table found")]
    NoGradientTable,

    #[error("Number of lines in gradient table ({table}) does not match input image ({volumes} volumes); check your input data")]
    GradientMismatch { table: usize, volumes: usize },

    #[error("no b=0 volumes found in the input, at least one is needed for masking and registration")]
    NoB0Volumes,

    #[error("{bvecs} b-vectors but {bvals} b-values")]
    BvecBvalMismatch { bvecs: usize, bvals: usize },

    #[error("series {index} has spatial size {actual:?}, expected {expected:?}")]
    SeriesDimensionMismatch {
        index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid NIfTI file {}: {reason}", .path.display())]
    InvalidNifti { path: PathBuf, reason: String },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("output {} already exists (use --force to overwrite)", .0.display())]
    OutputExists(PathBuf),

    #[error("failed to parse parameter file: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to serialize parameters: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DesignerError {
    /// wraps an io error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DesignerError::Io { path: path.into(), source }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        DesignerError::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DesignerError>;
