use crate::error::{DesignerError, Result};
use crate::pipeline::Pipeline;
use crate::tools::ToolCommand;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Phase encoding direction as accepted by `dwipreproc -pe_dir`. Axis designators are
/// upper-cased, anything else is passed on as given once it is known to be valid.
#[derive(Debug, Clone, PartialEq)]
pub struct PeDir(String);

const DESIGNATORS: [&str; 6] = ["LR", "RL", "AP", "PA", "IS", "SI"];
const AXIS_CODES: [&str; 6] = ["i", "i-", "j", "j-", "k", "k-"];

impl FromStr for PeDir {
    type Err = DesignerError;
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
        let upper = s.to_ascii_uppercase();
        if DESIGNATORS.contains(&upper.as_str()) {
            Ok(PeDir(upper))
        } else if matches!(unsigned, "0" | "1" | "2") || AXIS_CODES.contains(&s) {
            Ok(PeDir(s.to_string()))
        } else {
            Err(DesignerError::invalid_argument(format!(
                "unrecognized phase encoding direction {s:?}, expected a signed axis (e.g. -0, 1, +2), \
                 an axis designator (e.g. RL, PA, IS) or a NIfTI axis code (e.g. i-, j, k)"
            )))
        }
    }
}

impl fmt::Display for PeDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How reversed phase encoding data is supplied to eddy.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEncoding {
    /// no reversed data, eddy current and motion correction only
    None { pe_dir: PeDir },
    /// a b=0 image acquired with reversed phase encoding
    Pair { pe_dir: PeDir, reverse_b0: PathBuf },
    /// every volume acquired again with reversed phase encoding
    All { pe_dir: PeDir, reverse_dwi: PathBuf },
    /// phase encoding is read from the image headers
    Header,
}

impl PhaseEncoding {
    /// resolves reversed phase encoding images against `cwd`
    pub fn absolute(self, cwd: &Path) -> Self {
        match self {
            PhaseEncoding::Pair { pe_dir, reverse_b0 } => PhaseEncoding::Pair { pe_dir, reverse_b0: cwd.join(reverse_b0) },
            PhaseEncoding::All { pe_dir, reverse_dwi } => PhaseEncoding::All { pe_dir, reverse_dwi: cwd.join(reverse_dwi) },
            other => other,
        }
    }
}

fn dwipreproc(eddy_options: &str, rpe: &str) -> ToolCommand {
    ToolCommand::new("dwipreproc")
        .arg("-eddy_options")
        .arg(eddy_options)
        .arg(rpe)
}

/// Susceptibility, eddy current and motion correction through `dwipreproc` (topup + eddy),
/// `dwitf.mif -> dwiec.mif`. Gradient directions are rotated along with the volumes.
pub fn eddy(p: &mut Pipeline, pe: Option<&PhaseEncoding>) -> Result<()> {
    let Some(pe) = pe else {
        return p.bypass_move("dwitf.mif", "dwiec.mif");
    };
    log::info!("running eddy");
    let eddy_options = p.params().eddy_options.clone();
    match pe {
        PhaseEncoding::None { pe_dir } => {
            p.run(dwipreproc(&eddy_options, "-rpe_none")
                .arg("-pe_dir").arg(pe_dir.to_string())
                .arg("dwitf.mif")
                .output("dwiec.mif"))?;
        }
        PhaseEncoding::Header => {
            p.run(dwipreproc(&eddy_options, "-rpe_header")
                .arg("dwitf.mif")
                .output("dwiec.mif"))?;
        }
        PhaseEncoding::Pair { pe_dir, reverse_b0 } => {
            p.run(ToolCommand::new("dwiextract").args(["-bzero", "dwi.mif", "-"])
                .pipe(ToolCommand::new("mrconvert").args(["-coord", "3", "0", "-"]).output("b0pe.mif")))?;
            let size = p.image_size(reverse_b0)?;
            let first = if size.len() > 3 { vec!["-coord", "3", "0"] } else { vec![] };
            p.run(ToolCommand::new("mrconvert").args(first).arg(reverse_b0).output("b0rpe.mif"))?;
            p.run(ToolCommand::new("mrcat")
                .args(["-axis", "3", "b0pe.mif", "b0rpe.mif"])
                .output("rpepair.mif"))?;
            p.run(dwipreproc(&eddy_options, "-rpe_pair")
                .args(["-se_epi", "rpepair.mif"])
                .arg("-pe_dir").arg(pe_dir.to_string())
                .arg("dwitf.mif")
                .output("dwiec.mif"))?;
        }
        PhaseEncoding::All { pe_dir, reverse_dwi } => {
            // the reversed series shares the gradient table of the forward one
            p.run(ToolCommand::new("mrconvert")
                .arg("-export_grad_mrtrix").output("grad.txt")
                .arg("dwi.mif")
                .output("tmp.mif"))?;
            p.run(ToolCommand::new("mrconvert")
                .args(["-grad", "grad.txt"])
                .arg(reverse_dwi)
                .output("dwirpe.mif"))?;
            p.run(ToolCommand::new("mrcat")
                .args(["-axis", "3", "dwitf.mif", "dwirpe.mif"])
                .output("dwipe_rpe.mif"))?;
            p.run(dwipreproc(&eddy_options, "-rpe_all")
                .arg("-pe_dir").arg(pe_dir.to_string())
                .arg("dwipe_rpe.mif")
                .output("dwiec.mif"))?;
            p.ws().remove("tmp.mif")?;
        }
    }
    Ok(())
}
