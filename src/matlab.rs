use crate::config::DesignerParams;
use crate::error::Result;
use crate::export::FitOptions;
use crate::tools::ToolCommand;
use std::fmt;
use std::path::{Path, PathBuf};

/// An argument to a matlab function call.
#[derive(Debug, Clone, PartialEq)]
pub enum MatlabArg {
    Str(String),
    Int(i64),
}

impl From<&Path> for MatlabArg {
    fn from(p: &Path) -> Self {
        MatlabArg::Str(p.to_string_lossy().into_owned())
    }
}

impl From<bool> for MatlabArg {
    fn from(b: bool) -> Self {
        MatlabArg::Int(b as i64)
    }
}

impl fmt::Display for MatlabArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatlabArg::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
            MatlabArg::Int(i) => write!(f, "{}", i),
        }
    }
}

/// directory argument the designer routines expect: absolute with a trailing separator
fn dir_arg(dir: &Path) -> MatlabArg {
    let mut s = dir.to_string_lossy().into_owned();
    if !s.ends_with(std::path::MAIN_SEPARATOR) {
        s.push(std::path::MAIN_SEPARATOR);
    }
    MatlabArg::Str(s)
}

/// Calls into the matlab routines shipped with DESIGNER through `matlab -batch`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatlabEngine {
    binary: String,
    script_root: PathBuf,
    dki_root: PathBuf,
}

impl MatlabEngine {
    pub fn new(binary: impl Into<String>, script_root: impl Into<PathBuf>, dki_root: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into(), script_root: script_root.into(), dki_root: dki_root.into() }
    }

    pub fn from_params(params: &DesignerParams) -> Result<Self> {
        Ok(Self::new(&params.matlab_binary, params.script_root()?, params.toolbox_root()?))
    }

    /// batch statement that changes into the script root and calls `function`
    pub fn statement(&self, function: &str, args: &[MatlabArg]) -> String {
        let args = args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
        format!("cd({}); {}({});", MatlabArg::from(self.script_root.as_path()), function, args)
    }

    pub fn call(&self, function: &str, args: &[MatlabArg]) -> ToolCommand {
        ToolCommand::new(&self.binary).arg("-batch").arg(self.statement(function, args))
    }

    /// CSF excluded smoothing of `dwibc.nii` in the scratch dir, writing `dwism.nii`.
    /// The kernel width goes over as a char array.
    pub fn run_smoothing(&self, scratch: &Path, fwhm: f64) -> ToolCommand {
        self.call("runsmoothing", &[
            dir_arg(scratch),
            MatlabArg::Str(fwhm.to_string()),
            self.dki_root.as_path().into(),
        ]).produces(scratch.join("dwism.nii"))
    }

    /// tensor / kurtosis fitting of the processed dwi, writing parameter maps to `out_dir`
    pub fn tensor_fitting(&self, scratch: &Path, out_dir: &Path, fit: &FitOptions) -> ToolCommand {
        self.call("tensorfitting", &[
            dir_arg(scratch),
            out_dir.into(),
            fit.outliers.into(),
            fit.dti.into(),
            fit.dki.into(),
            fit.wmti.into(),
            MatlabArg::Str(fit.constraints.to_string()),
            self.dki_root.as_path().into(),
        ])
    }
}
