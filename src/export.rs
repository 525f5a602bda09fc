use crate::config::{Datatype, FitConstraints};
use crate::error::{DesignerError, Result};
use crate::pipeline::Pipeline;
use crate::tools::ToolCommand;
use std::fs;
use std::path::{Path, PathBuf};

const RESULT_EXTS: [&str; 3] = ["nii", "bvec", "bval"];

/// Which parameter maps the fitting routine writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// IRWLLS outlier detection before fitting
    pub outliers: bool,
    pub dti: bool,
    pub dki: bool,
    pub wmti: bool,
    pub constraints: FitConstraints,
}

/// Where the processed data ends up.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMode {
    /// `<basename>.nii/.bvec/.bval`, nothing else
    ProcessingOnly { basename: PathBuf, datatype: Option<Datatype> },
    /// `<dir>/dwi_designer.*` plus the requested parameter maps
    Directory { dir: PathBuf, fit: FitOptions },
}

fn with_ext(base: &Path, ext: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

impl OutputMode {
    /// the processed dwi and its gradient files
    pub fn targets(&self) -> Vec<PathBuf> {
        let base = match self {
            OutputMode::ProcessingOnly { basename, .. } => basename.clone(),
            OutputMode::Directory { dir, .. } => dir.join("dwi_designer"),
        };
        RESULT_EXTS.iter().map(|ext| with_ext(&base, ext)).collect()
    }
}

fn copy_out(p: &Pipeline, name: &str, target: &Path) -> Result<()> {
    fs::copy(p.ws().path(name), target).map_err(|e| DesignerError::io(target, e))?;
    Ok(())
}

/// Copies `dwi_designer.*` out of the scratch dir. In directory mode the command history
/// is saved next to it and the tensor fitting runs on the result.
pub fn export(p: &mut Pipeline, mode: &OutputMode) -> Result<()> {
    let targets = mode.targets();
    let [nii, bvec, bval] = [&targets[0], &targets[1], &targets[2]];
    match mode {
        OutputMode::ProcessingOnly { datatype, .. } => {
            log::info!("writing {}", nii.display());
            match datatype {
                Some(dt) => {
                    let src = p.ws().path("dwi_designer.nii");
                    p.run(ToolCommand::new("mrconvert")
                        .arg("-datatype").arg(dt.to_string())
                        .arg(src)
                        .output(nii))?;
                }
                None => copy_out(p, "dwi_designer.nii", nii)?,
            }
            copy_out(p, "dwi_designer.bvec", bvec)?;
            copy_out(p, "dwi_designer.bval", bval)?;
        }
        OutputMode::Directory { dir, fit } => {
            log::info!("writing results to {}", dir.display());
            fs::create_dir_all(dir).map_err(|e| DesignerError::io(dir, e))?;
            copy_out(p, "dwi_designer.nii", nii)?;
            copy_out(p, "dwi_designer.bvec", bvec)?;
            copy_out(p, "dwi_designer.bval", bval)?;

            let history = dir.join("designer_history.json");
            let json = serde_json::to_string_pretty(p.history())?;
            fs::write(&history, json).map_err(|e| DesignerError::io(&history, e))?;

            log::info!("fitting diffusion parameters");
            let call = p.matlab()?.tensor_fitting(p.ws().dir(), dir, fit);
            p.run(call)?;
        }
    }
    Ok(())
}
