use crate::eddy::{PeDir, PhaseEncoding};
use crate::error::{DesignerError, Result};
use crate::export::{FitOptions, OutputMode};
use clap::{ArgGroup, Parser};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// DWI processing with DESIGNER
///
/// 1. concatenate all dwi series and check their dimensions agree
/// 2. denoise the complete dataset
/// 3. gibbs ringing correction on the complete dataset
/// 4. rigid alignment of multiple series to improve eddy results
/// 5. topup + eddy, rotating the output bvecs
/// 6. b1 bias correction on each dwi subset
/// 7. optional CSF excluded smoothing
/// 8. rician bias correction
/// 9. irwlls outlier map and dki fit
#[derive(Debug, Parser)]
#[command(name = "designer", version, group(ArgGroup::new("rpe").multiple(false)))]
pub struct DesignerArgs {
    /// The input DWI series. For multiple input series, separate file names with commas
    /// (i.e. dwi1.nii,dwi2.nii,...)
    pub input: String,

    /// The output directory (includes diffusion parameters and processed dwi) unless
    /// --processing-only is used, in which case this is the output basename
    pub output: PathBuf,

    /// Perform dwidenoise
    #[arg(long)]
    pub denoise: bool,

    /// Denoising extent. Default is 5,5,5
    #[arg(long, value_name = "SIZE")]
    pub extent: Option<Extent>,

    /// Perform Gibbs artifact correction
    #[arg(long)]
    pub degibbs: bool,

    /// Perform Rician bias correction
    #[arg(long)]
    pub rician: bool,

    /// If there are multiple input diffusion series, do rigid alignment prior to eddy to
    /// maximize motion correction performance
    #[arg(long)]
    pub prealign: bool,

    /// Run fsl eddy (requires one of the phase encoding options)
    #[arg(long)]
    pub eddy: bool,

    /// Include a bias correction step in dwi preprocessing
    #[arg(long)]
    pub b1correct: bool,

    /// Include a (csf-free) smoothing step during dwi preprocessing. FWHM is usually
    /// 1.20 x voxel size
    #[arg(long, value_name = "FWHM")]
    pub smooth: Option<f64>,

    /// Include DTI parameters in output folder (md, ad, rd, fa, eigenvalues, eigenvectors)
    #[arg(long, alias = "DTIparams")]
    pub dti_params: bool,

    /// Include DKI parameters in output folder (mk, ak, rk)
    #[arg(long, alias = "DKIparams")]
    pub dki_params: bool,

    /// Include WMTI parameters in output folder (awf, ias_params, eas_params)
    #[arg(long, alias = "WMTIparams")]
    pub wmti_params: bool,

    /// Output only the processed diffusion weighted image
    #[arg(long)]
    pub processing_only: bool,

    /// Output datatype when using --processing-only (float32, int16le, cfloat64, ...)
    #[arg(long, value_name = "SPEC")]
    pub datatype: Option<Datatype>,

    /// Constrain the wlls fit (default 0,1,0)
    #[arg(long)]
    pub fit_constraints: Option<FitConstraints>,

    /// Perform IRWLLS outlier detection
    #[arg(long)]
    pub outliers: bool,

    /// No reversed phase-encoding image data is provided; eddy will perform eddy current
    /// and motion correction only
    #[arg(long, group = "rpe")]
    pub rpe_none: bool,

    /// The reverse phase encoding b=0 image
    #[arg(long, group = "rpe", value_name = "IMAGE")]
    pub rpe_pair: Option<PathBuf>,

    /// ALL DWIs have been acquired with opposing phase-encoding; the argument is the set
    /// of volumes with reverse phase encoding but the same b-vectors as the input
    #[arg(long, group = "rpe", value_name = "IMAGE")]
    pub rpe_all: Option<PathBuf>,

    /// The phase-encoding information is found in the image header(s)
    #[arg(long, group = "rpe")]
    pub rpe_header: bool,

    /// Phase encoding direction of the input series (required with the eddy option). A
    /// signed axis number (e.g. -0, 1, +2), an axis designator (e.g. RL, PA, IS), or
    /// NIfTI axis codes (e.g. i-, j, k)
    #[arg(long, value_name = "PE", allow_hyphen_values = true)]
    pub pe_dir: Option<PeDir>,

    /// Tool and engine settings (toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Parent directory for the scratch directory (defaults to the working directory)
    #[arg(long)]
    pub tempdir: Option<PathBuf>,

    /// Do not delete the scratch directory when the run finishes
    #[arg(long)]
    pub nocleanup: bool,

    /// Overwrite existing outputs
    #[arg(long)]
    pub force: bool,
}

/// The validated set of stages and parameters for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub denoise: bool,
    pub extent: Extent,
    pub degibbs: bool,
    pub prealign: bool,
    pub eddy: Option<PhaseEncoding>,
    pub b1correct: bool,
    pub smooth: Option<f64>,
    pub rician: bool,
    pub output: OutputMode,
    pub force: bool,
}

impl DesignerArgs {
    fn phase_encoding(&self) -> Result<Option<PhaseEncoding>> {
        let needs_pe_dir = || {
            self.pe_dir.clone().ok_or_else(|| DesignerError::invalid_argument("the eddy option requires --pe-dir with --rpe-none, --rpe-pair or --rpe-all"))
        };
        let pe = if self.rpe_none {
            Some(PhaseEncoding::None { pe_dir: needs_pe_dir()? })
        } else if let Some(reverse) = &self.rpe_pair {
            Some(PhaseEncoding::Pair { pe_dir: needs_pe_dir()?, reverse_b0: reverse.clone() })
        } else if let Some(reverse) = &self.rpe_all {
            Some(PhaseEncoding::All { pe_dir: needs_pe_dir()?, reverse_dwi: reverse.clone() })
        } else if self.rpe_header {
            Some(PhaseEncoding::Header)
        } else {
            None
        };
        Ok(pe)
    }

    /// resolves the flags into the stages to run, relative paths against `cwd`
    pub fn run_options(&self, cwd: &Path) -> Result<RunOptions> {
        let eddy = if self.eddy {
            match self.phase_encoding()? {
                Some(pe) => Some(pe.absolute(cwd)),
                None => return Err(DesignerError::invalid_argument(
                    "the eddy option must run alongside --rpe-none, --rpe-header, --rpe-all, or --rpe-pair"
                )),
            }
        } else {
            if self.rpe_none || self.rpe_pair.is_some() || self.rpe_all.is_some() || self.rpe_header {
                log::warn!("phase encoding options are ignored without --eddy");
            }
            None
        };

        if let Some(fwhm) = self.smooth {
            if !(fwhm > 0.) {
                return Err(DesignerError::invalid_argument(format!("smoothing fwhm must be positive, got {fwhm}")));
            }
        }

        let output = cwd.join(&self.output);
        let output = if self.processing_only {
            if self.dti_params || self.dki_params || self.wmti_params || self.outliers || self.fit_constraints.is_some() {
                log::warn!("parameter fitting options are ignored with --processing-only");
            }
            OutputMode::ProcessingOnly { basename: output, datatype: self.datatype.clone() }
        } else {
            if self.datatype.is_some() {
                log::warn!("--datatype only applies with --processing-only and is ignored");
            }
            OutputMode::Directory {
                dir: output,
                fit: FitOptions {
                    outliers: self.outliers,
                    dti: self.dti_params,
                    dki: self.dki_params,
                    wmti: self.wmti_params,
                    constraints: self.fit_constraints.unwrap_or_default(),
                },
            }
        };

        Ok(RunOptions {
            denoise: self.denoise,
            extent: self.extent.unwrap_or_default(),
            degibbs: self.degibbs,
            prealign: self.prealign,
            eddy,
            b1correct: self.b1correct,
            smooth: self.smooth,
            rician: self.rician,
            output,
            force: self.force,
        })
    }
}

/// Denoising window, `dwidenoise -extent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent(pub [usize; 3]);

impl Default for Extent {
    fn default() -> Self {
        Extent([5, 5, 5])
    }
}

impl FromStr for Extent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let sizes = s.split(',')
            .map(|v| v.trim().parse::<usize>().map_err(|_| format!("invalid extent entry {v:?}")))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let extent = match sizes.as_slice() {
            &[n] => [n, n, n],
            &[x, y, z] => [x, y, z],
            _ => return Err(format!("extent must be one or three sizes, got {s:?}")),
        };
        if extent.iter().any(|&n| n == 0 || n % 2 == 0) {
            return Err(format!("extent sizes must be odd and positive, got {s:?}"));
        }
        Ok(Extent(extent))
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.0;
        write!(f, "{x},{y},{z}")
    }
}

/// Three on/off constraints passed to the wlls fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitConstraints(pub [bool; 3]);

impl Default for FitConstraints {
    fn default() -> Self {
        FitConstraints([false, true, false])
    }
}

impl FromStr for FitConstraints {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let flags = s.split(',').map(|v| match v.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(format!("fit constraints are 0 or 1, got {other:?}")),
        }).collect::<std::result::Result<Vec<_>, _>>()?;
        let flags: [bool; 3] = flags.try_into().map_err(|_| format!("expected three constraints, got {s:?}"))?;
        Ok(FitConstraints(flags))
    }
}

impl fmt::Display for FitConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.iter().map(|&b| if b { "1" } else { "0" }).collect::<Vec<_>>();
        write!(f, "{}", s.join(","))
    }
}

const DATATYPES: [&str; 37] = [
    "float32", "float32le", "float32be", "float64", "float64le", "float64be",
    "int64", "uint64", "int64le", "uint64le", "int64be", "uint64be",
    "int32", "uint32", "int32le", "uint32le", "int32be", "uint32be",
    "int16", "uint16", "int16le", "uint16le", "int16be", "uint16be",
    "cfloat32", "cfloat32le", "cfloat32be", "cfloat64", "cfloat64le", "cfloat64be",
    "int8", "uint8", "bit",
    // accepted by mrconvert as well
    "cint16", "cint32", "float16", "float16le",
];

/// An mrtrix output datatype name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datatype(String);

impl FromStr for Datatype {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if DATATYPES.contains(&lower.as_str()) {
            Ok(Datatype(lower))
        } else {
            Err(format!("unknown datatype {s:?}, valid options are {}", DATATYPES.join(", ")))
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tool settings that rarely change between runs. Written with `designer-params` and read
/// back with `--config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignerParams {
    /// matlab executable
    pub matlab_binary: String,
    /// directory holding runsmoothing.m and tensorfitting.m (defaults to the executable's directory)
    pub designer_root: Option<PathBuf>,
    /// root of the DKI matlab toolbox (defaults to the parent of designer_root)
    pub dki_root: Option<PathBuf>,
    /// options handed to eddy through dwipreproc
    pub eddy_options: String,
    pub degibbs_nshifts: u32,
    pub degibbs_min_w: u32,
    pub degibbs_max_w: u32,
    /// fractional intensity threshold for bet
    pub bet_fraction: f64,
    /// tissue classes for fast
    pub fast_classes: u32,
    /// fast image type (1 = T1, 2 = T2, 3 = PD)
    pub fast_image_type: u32,
    /// partial volume threshold for a voxel to count towards a tissue class
    pub tissue_threshold: f64,
    /// percentile of the brain intensity used to rank the tissue classes
    pub csf_percentile: u32,
    /// partial volume threshold for the CSF mask
    pub csf_threshold: f64,
    /// highest shell used to estimate the noise map for rician correction
    pub rician_max_bval: f64,
}

impl Default for DesignerParams {
    fn default() -> Self {
        Self {
            matlab_binary: "matlab".to_string(),
            designer_root: None,
            dki_root: None,
            eddy_options: " --repol --data_is_shelled".to_string(),
            degibbs_nshifts: 20,
            degibbs_min_w: 1,
            degibbs_max_w: 3,
            bet_fraction: 0.25,
            fast_classes: 4,
            fast_image_type: 2,
            tissue_threshold: 0.95,
            csf_percentile: 95,
            csf_threshold: 0.7,
            rician_max_bval: 2000.,
        }
    }
}

impl DesignerParams {
    /// reads a parameter file, forcing a `.toml` extension
    pub fn from_file(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref().with_extension("toml");
        let toml_str = fs::read_to_string(&file).map_err(|e| DesignerError::io(&file, e))?;
        Ok(toml::from_str(&toml_str)?)
    }

    /// writes the parameters as toml, returning the file written
    pub fn to_file(&self, file: impl AsRef<Path>) -> Result<PathBuf> {
        let filename = file.as_ref().with_extension("toml");
        let mut toml_string = toml::to_string(self)?;
        toml_string.push('\n');
        fs::write(&filename, toml_string).map_err(|e| DesignerError::io(&filename, e))?;
        Ok(filename)
    }

    /// directory matlab changes into before calling the designer routines
    pub fn script_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.designer_root {
            return Ok(root.clone());
        }
        let exe = std::env::current_exe().map_err(|e| DesignerError::io("current executable", e))?;
        exe.parent().map(Path::to_path_buf)
            .ok_or_else(|| DesignerError::invalid_argument("cannot resolve the designer root directory"))
    }

    pub fn toolbox_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.dki_root {
            return Ok(root.clone());
        }
        let root = self.script_root()?;
        Ok(root.parent().map(Path::to_path_buf).unwrap_or(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> std::result::Result<DesignerArgs, clap::Error> {
        DesignerArgs::try_parse_from(std::iter::once("designer").chain(args.iter().copied()))
    }

    #[test]
    fn extents() {
        assert_eq!("5".parse::<Extent>().unwrap(), Extent([5, 5, 5]));
        assert_eq!("3,5,7".parse::<Extent>().unwrap().to_string(), "3,5,7");
        assert!("4,4,4".parse::<Extent>().is_err());
        assert!("5,5".parse::<Extent>().is_err());
        assert!("a".parse::<Extent>().is_err());
        assert_eq!(Extent::default().to_string(), "5,5,5");
    }

    #[test]
    fn fit_constraints() {
        assert_eq!(FitConstraints::default().to_string(), "0,1,0");
        assert_eq!("1,1,0".parse::<FitConstraints>().unwrap(), FitConstraints([true, true, false]));
        assert!("1,2,0".parse::<FitConstraints>().is_err());
        assert!("1,0".parse::<FitConstraints>().is_err());
    }

    #[test]
    fn datatypes() {
        assert_eq!("Float32LE".parse::<Datatype>().unwrap().to_string(), "float32le");
        assert!("float128".parse::<Datatype>().is_err());
    }

    #[test]
    fn minimal_run_is_directory_output_without_stages() {
        let args = parse(&["dwi.nii", "out"]).unwrap();
        let opts = args.run_options(Path::new("/work")).unwrap();
        assert!(!opts.denoise && !opts.degibbs && !opts.prealign && !opts.b1correct && !opts.rician);
        assert_eq!(opts.eddy, None);
        assert_eq!(opts.extent, Extent::default());
        assert_eq!(opts.output, OutputMode::Directory {
            dir: PathBuf::from("/work/out"),
            fit: FitOptions { outliers: false, dti: false, dki: false, wmti: false, constraints: FitConstraints::default() },
        });
    }

    #[test]
    fn eddy_needs_a_phase_encoding_scheme() {
        let args = parse(&["dwi.nii", "out", "--eddy"]).unwrap();
        assert!(matches!(args.run_options(Path::new("/work")), Err(DesignerError::InvalidArgument(_))));

        let args = parse(&["dwi.nii", "out", "--eddy", "--rpe-none"]).unwrap();
        assert!(args.run_options(Path::new("/work")).is_err(), "pe_dir is required");

        let args = parse(&["dwi.nii", "out", "--eddy", "--rpe-pair", "rpe.nii", "--pe-dir", "j-"]).unwrap();
        let opts = args.run_options(Path::new("/work")).unwrap();
        assert_eq!(opts.eddy, Some(PhaseEncoding::Pair {
            pe_dir: "j-".parse().unwrap(),
            reverse_b0: PathBuf::from("/work/rpe.nii"),
        }));

        let args = parse(&["dwi.nii", "out", "--eddy", "--rpe-header"]).unwrap();
        assert_eq!(args.run_options(Path::new("/work")).unwrap().eddy, Some(PhaseEncoding::Header));
    }

    #[test]
    fn phase_encoding_options_are_exclusive() {
        assert!(parse(&["dwi.nii", "out", "--rpe-none", "--rpe-header"]).is_err());
    }

    #[test]
    fn negative_axis_numbers_are_values() {
        let args = parse(&["dwi.nii", "out", "--eddy", "--rpe-none", "--pe-dir", "-1"]).unwrap();
        assert_eq!(args.pe_dir.unwrap().to_string(), "-1");
    }

    #[test]
    fn processing_only_keeps_datatype() {
        let args = parse(&["dwi.nii", "res/dwi_out", "--processing-only", "--datatype", "int16", "--denoise", "--extent", "7"]).unwrap();
        let opts = args.run_options(Path::new("/work")).unwrap();
        assert!(opts.denoise);
        assert_eq!(opts.extent, Extent([7, 7, 7]));
        assert_eq!(opts.output, OutputMode::ProcessingOnly {
            basename: PathBuf::from("/work/res/dwi_out"),
            datatype: Some("int16".parse().unwrap()),
        });
    }

    #[test]
    fn legacy_parameter_flag_names() {
        let args = parse(&["dwi.nii", "out", "--DTIparams", "--DKIparams", "--fit-constraints", "1,1,1"]).unwrap();
        let opts = args.run_options(Path::new("/w")).unwrap();
        match opts.output {
            OutputMode::Directory { fit, .. } => {
                assert!(fit.dti && fit.dki && !fit.wmti);
                assert_eq!(fit.constraints, FitConstraints([true, true, true]));
            }
            other => panic!("unexpected output mode {other:?}"),
        }
    }

    #[test]
    fn non_positive_fwhm_is_rejected() {
        let args = parse(&["dwi.nii", "out", "--smooth", "0"]).unwrap();
        assert!(args.run_options(Path::new("/w")).is_err());
    }

    #[test]
    fn params_round_trip_through_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = DesignerParams::default();
        params.bet_fraction = 0.3;
        params.designer_root = Some(PathBuf::from("/opt/designer"));
        let written = params.to_file(dir.path().join("params")).unwrap();
        assert_eq!(written.extension().unwrap(), "toml");
        assert_eq!(DesignerParams::from_file(dir.path().join("params")).unwrap(), params);
        assert_eq!(params.toolbox_root().unwrap(), PathBuf::from("/opt"));
    }

    #[test]
    fn partial_params_file_uses_defaults() {
        let params: DesignerParams = toml::from_str("matlab_binary = \"/usr/local/bin/matlab\"\n").unwrap();
        assert_eq!(params.matlab_binary, "/usr/local/bin/matlab");
        assert_eq!(params.degibbs_nshifts, 20);
    }
}
