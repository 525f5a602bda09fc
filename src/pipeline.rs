use crate::config::{DesignerArgs, DesignerParams, RunOptions};
use crate::error::{DesignerError, Result};
use crate::export::OutputMode;
use crate::gradient::{format_shells, GradientTable, B0_THRESHOLD};
use crate::matlab::MatlabEngine;
use crate::series::{parse_input_list, DwiSeries, VolumeRanges};
use crate::tools::{check_tools, fsl_suffix, Invocation, ProcessRunner, ToolCommand, ToolRunner};
use crate::workspace::Workspace;
use crate::{biascorrect, degibbs, denoise, eddy, export, prealign, smooth};
use std::path::Path;
use std::time::Instant;

/// Shared state handed to every stage: where to run, how to run, and with which settings.
pub struct Pipeline<'a> {
    runner: &'a mut dyn ToolRunner,
    ws: &'a Workspace,
    params: &'a DesignerParams,
    fsl_suffix: String,
    matlab: Option<MatlabEngine>,
    history: Vec<String>,
}

impl<'a> Pipeline<'a> {
    pub fn new(runner: &'a mut dyn ToolRunner, ws: &'a Workspace, params: &'a DesignerParams, fsl_suffix: &str) -> Self {
        Self { runner, ws, params, fsl_suffix: fsl_suffix.to_string(), matlab: None, history: vec![] }
    }

    pub fn with_matlab(mut self, engine: MatlabEngine) -> Self {
        self.matlab = Some(engine);
        self
    }

    pub fn ws(&self) -> &Workspace {
        self.ws
    }

    pub fn params(&self) -> &DesignerParams {
        self.params
    }

    /// file suffix of FSL outputs, e.g. `.nii.gz`
    pub fn fsl_suffix(&self) -> &str {
        &self.fsl_suffix
    }

    /// scratch file name with the FSL suffix appended
    pub fn fsl_file(&self, stem: &str) -> String {
        format!("{}{}", stem, self.fsl_suffix)
    }

    pub fn matlab(&self) -> Result<&MatlabEngine> {
        self.matlab.as_ref().ok_or_else(|| DesignerError::invalid_argument("this run needs matlab but no engine was configured"))
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// runs an external invocation, returning its stdout
    pub fn run(&mut self, invocation: impl Into<Invocation>) -> Result<String> {
        let invocation = invocation.into();
        let line = invocation.to_string();
        log::debug!("{}", line);
        let out = self.runner.run(&invocation)?;
        self.history.push(line);
        Ok(out)
    }

    /// spatial and volume dimensions of an image as reported by `mrinfo -size`
    pub fn image_size(&mut self, image: impl AsRef<Path>) -> Result<Vec<usize>> {
        let cmd = ToolCommand::new("mrinfo").arg("-size").arg(image.as_ref());
        let line = cmd.to_string();
        let out = self.run(cmd)?;
        let size = out.split_ascii_whitespace().map(|s| s.parse::<usize>()).collect::<std::result::Result<Vec<_>, _>>();
        match size {
            Ok(size) if !size.is_empty() => Ok(size),
            _ => Err(DesignerError::UnexpectedToolOutput { command: line, output: out }),
        }
    }

    /// the gradient table stored in an image header
    pub fn gradient_table(&mut self, image: &str) -> Result<GradientTable> {
        let cmd = ToolCommand::new("mrinfo").args(["-dwgrad", image]);
        let line = cmd.to_string();
        let out = self.run(cmd)?;
        GradientTable::parse(&out).map_err(|bad| {
            log::error!("cannot read gradient table line {:?}", bad);
            DesignerError::UnexpectedToolOutput { command: line, output: out.clone() }
        })
    }

    /// stands in for a disabled stage by copying its input to its output
    pub fn bypass_copy(&self, from: &str, to: &str) -> Result<()> {
        log::debug!("copy {} -> {}", from, to);
        self.ws.copy(from, to)
    }

    /// stands in for a disabled stage by renaming its input to its output
    pub fn bypass_move(&self, from: &str, to: &str) -> Result<()> {
        log::debug!("move {} -> {}", from, to);
        self.ws.rename(from, to)
    }
}

/// What normalization learned about the working volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub size: Vec<usize>,
    pub series: VolumeRanges,
    pub gradients: GradientTable,
}

impl Dataset {
    pub fn n_volumes(&self) -> usize {
        self.size.get(3).copied().unwrap_or(1)
    }

    pub fn is_multi_series(&self) -> bool {
        self.series.len() > 1
    }
}

fn import_series(p: &mut Pipeline, s: &DwiSeries, target: &str) -> Result<()> {
    p.run(ToolCommand::new("mrconvert")
        .args(["-stride", "-1,2,3,4", "-fslgrad"])
        .arg(&s.bvec)
        .arg(&s.bval)
        .arg(&s.image)
        .output(target))?;
    Ok(())
}

/// converts every input series into the scratch dir and concatenates them into `dwi.mif`
pub fn normalize(p: &mut Pipeline, series: &[DwiSeries]) -> Result<Dataset> {
    if series.is_empty() {
        return Err(DesignerError::invalid_argument("no input series given"));
    }
    log::info!("importing {} diffusion series", series.len());
    let ranges = if let [single] = series {
        import_series(p, single, "dwi.mif")?;
        None
    } else {
        let mut counts = vec![];
        let mut names = vec![];
        let mut spatial: Option<Vec<usize>> = None;
        for (idx, s) in series.iter().enumerate() {
            let name = format!("dwi{idx}.mif");
            import_series(p, s, &name)?;
            let size = p.image_size(&name)?;
            let this_spatial = size.iter().take(3).copied().collect::<Vec<_>>();
            match &spatial {
                Some(expected) if *expected != this_spatial => {
                    return Err(DesignerError::SeriesDimensionMismatch { index: idx, expected: expected.clone(), actual: this_spatial });
                }
                Some(_) => {}
                None => spatial = Some(this_spatial),
            }
            counts.push(size.get(3).copied().unwrap_or(1));
            names.push(name);
        }
        p.run(ToolCommand::new("mrcat").args(["-axis", "3"]).args(&names).output("dwi.mif"))?;
        Some(VolumeRanges::from_counts(&counts))
    };

    let size = p.image_size("dwi.mif")?;
    let n_volumes = size.get(3).copied().unwrap_or(1);
    let gradients = p.gradient_table("dwi.mif")?;
    gradients.validate(n_volumes)?;
    let n_b0 = gradients.b0_mask(B0_THRESHOLD).iter().filter(|&&b0| b0).count();
    if n_b0 == 0 {
        return Err(DesignerError::NoB0Volumes);
    }
    log::info!("{} volumes, {} at b=0, shells {}", n_volumes, n_b0, format_shells(&gradients.shells()));

    let series = ranges.unwrap_or_else(|| VolumeRanges::from_counts(&[n_volumes]));
    if series.total() != n_volumes {
        return Err(DesignerError::GradientMismatch { table: series.total(), volumes: n_volumes });
    }
    Ok(Dataset { size, series, gradients })
}

/// runs every stage in order
pub fn run_stages(p: &mut Pipeline, opts: &RunOptions, series: &[DwiSeries]) -> Result<()> {
    let ds = normalize(p, series)?;
    denoise::denoise(p, opts.denoise, &opts.extent)?;
    degibbs::degibbs(p, opts.degibbs)?;
    prealign::prealign(p, &ds, opts.prealign)?;
    eddy::eddy(p, opts.eddy.as_ref())?;
    biascorrect::b1correct(p, &ds, opts.b1correct)?;
    biascorrect::brain_mask(p)?;
    smooth::smooth(p, opts.smooth)?;
    denoise::rician(p, &ds, opts.rician, &opts.extent)?;
    export::export(p, &opts.output)
}

/// binaries the enabled stages will call
pub fn required_tools<'a>(opts: &RunOptions, params: &'a DesignerParams) -> Vec<&'a str> {
    let mut tools = vec!["mrconvert", "mrinfo", "mrcat", "dwiextract", "mrmath", "mrcalc", "bet"];
    if opts.denoise || opts.rician {
        tools.push("dwidenoise");
    }
    if opts.degibbs {
        tools.push("mrdegibbs");
    }
    if opts.prealign {
        tools.extend(["mrregister", "mrtransform"]);
    }
    if opts.eddy.is_some() {
        tools.push("dwipreproc");
    }
    if opts.b1correct {
        tools.push("dwibiascorrect");
    }
    if opts.smooth.is_some() {
        tools.extend(["fast", "fslmaths", "fslstats"]);
    }
    if needs_matlab(opts) {
        tools.push(params.matlab_binary.as_str());
    }
    tools
}

fn needs_matlab(opts: &RunOptions) -> bool {
    opts.smooth.is_some() || matches!(opts.output, OutputMode::Directory { .. })
}

fn check_outputs(opts: &RunOptions) -> Result<()> {
    let existing = opts.output.targets().into_iter().find(|p| p.exists());
    match existing {
        Some(p) if !opts.force => Err(DesignerError::OutputExists(p)),
        Some(p) => {
            log::warn!("overwriting existing output {}", p.display());
            Ok(())
        }
        None => Ok(()),
    }
}

/// runs DESIGNER end to end with real processes
pub fn designer_exec(args: &DesignerArgs, params: &DesignerParams) -> Result<()> {
    let cwd = std::env::current_dir().map_err(|e| DesignerError::io(".", e))?;
    let opts = args.run_options(&cwd)?;

    let series = parse_input_list(&args.input, &cwd)?;
    for s in &series {
        let n = s.check()?;
        log::info!("found {} with {} volumes", s.image.display(), n);
    }
    check_outputs(&opts)?;
    check_tools(required_tools(&opts, params))?;

    let matlab = if needs_matlab(&opts) { Some(MatlabEngine::from_params(params)?) } else { None };
    let suffix = fsl_suffix(std::env::var("FSLOUTPUTTYPE").ok().as_deref());

    let scratch_parent = args.tempdir.as_ref().map(|t| cwd.join(t)).unwrap_or_else(|| cwd.clone());
    let mut ws = Workspace::create(&scratch_parent, args.nocleanup)?;
    let mut runner = ProcessRunner::new(ws.dir());

    let now = Instant::now();
    let result = {
        let mut p = Pipeline::new(&mut runner, &ws, params, suffix);
        if let Some(engine) = matlab {
            p = p.with_matlab(engine);
        }
        run_stages(&mut p, &opts, &series)
    };
    match result {
        Ok(()) => {
            log::info!("designer finished in {:.01} minutes", now.elapsed().as_secs_f32() / 60.);
            ws.finish()
        }
        Err(e) => {
            ws.retain();
            ws.finish()?;
            Err(e)
        }
    }
}
