use crate::error::{DesignerError, Result};
use crate::pipeline::Pipeline;
use crate::tools::ToolCommand;

/// index of the first largest value
fn first_max(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Segments the brain into tissue classes with FAST and writes `CSFmask{sfx}`, the class
/// that is brightest at the configured percentile.
fn csf_mask(p: &mut Pipeline) -> Result<()> {
    let params = p.params().clone();
    let brain = p.fsl_file("brain");
    let mut fast = ToolCommand::new("fast")
        .arg("-n").arg(params.fast_classes.to_string())
        .arg("-t").arg(params.fast_image_type.to_string())
        .args(["-o", "tissue"])
        .arg(&brain);
    for i in 0..params.fast_classes {
        fast = fast.produces(p.fsl_file(&format!("tissue_pve_{i}")));
    }
    p.run(fast)?;

    let mut levels = vec![];
    for i in 0..params.fast_classes {
        let pve = p.fsl_file(&format!("tissue_pve_{i}"));
        let thr = p.fsl_file(&format!("tissue_pve_thr{i}"));
        p.run(ToolCommand::new("fslmaths")
            .arg(&pve)
            .arg("-thr").arg(params.tissue_threshold.to_string())
            .arg("-bin")
            .output(&thr))?;
        let cmd = ToolCommand::new("fslstats")
            .arg(&brain)
            .arg("-k").arg(&thr)
            .arg("-P").arg(params.csf_percentile.to_string());
        let line = cmd.to_string();
        let out = p.run(cmd)?;
        let level = out.split_ascii_whitespace().next().and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| DesignerError::UnexpectedToolOutput { command: line, output: out.clone() })?;
        levels.push(level);
    }
    let csf = first_max(&levels);
    log::info!("tissue class {} taken as csf (percentile levels {:?})", csf, levels);

    let mask = p.fsl_file("CSFmask");
    let pve = p.fsl_file(&format!("tissue_pve_{csf}"));
    p.run(ToolCommand::new("fslmaths")
        .arg(&pve)
        .arg("-thr").arg(params.csf_threshold.to_string())
        .arg("-bin")
        .output(&mask))?;
    if mask.ends_with(".nii.gz") {
        p.run(ToolCommand::new("mrconvert").arg(&mask).output("CSFmask.nii"))?;
    }
    Ok(())
}

/// CSF excluded gaussian smoothing with kernel width `fwhm`, `dwibc.mif -> dwism.mif`
pub fn smooth(p: &mut Pipeline, fwhm: Option<f64>) -> Result<()> {
    let Some(fwhm) = fwhm else {
        return p.bypass_move("dwibc.mif", "dwism.mif");
    };
    log::info!("csf excluded smoothing, fwhm {}", fwhm);
    p.run(ToolCommand::new("mrconvert")
        .args(["-force", "-export_grad_mrtrix"]).output("grad.txt")
        .arg("dwibc.mif")
        .output("dwibc.nii"))?;
    csf_mask(p)?;

    let call = p.matlab()?.run_smoothing(p.ws().dir(), fwhm);
    p.run(call)?;
    p.run(ToolCommand::new("mrconvert")
        .args(["-grad", "grad.txt", "dwism.nii"])
        .output("dwism.mif"))?;
    Ok(())
}
