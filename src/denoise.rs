use crate::config::Extent;
use crate::error::Result;
use crate::gradient::format_shells;
use crate::pipeline::{Dataset, Pipeline};
use crate::tools::ToolCommand;

/// MP-PCA denoising of the full dataset, `dwi.mif -> dwidn.mif`. The noise map is kept
/// in the scratch dir as `fullnoisemap.mif`.
pub fn denoise(p: &mut Pipeline, enabled: bool, extent: &Extent) -> Result<()> {
    if !enabled {
        return p.bypass_copy("dwi.mif", "dwidn.mif");
    }
    log::info!("denoising with extent {}", extent);
    p.run(ToolCommand::new("dwidenoise")
        .arg("-extent").arg(extent.to_string())
        .arg("-noise").output("fullnoisemap.mif")
        .arg("dwi.mif")
        .output("dwidn.mif"))?;
    Ok(())
}

/// Rician bias correction of the smoothed data, `dwism.mif -> dwi_designer.nii`.
///
/// The noise level is estimated from the low shells of the raw input only, then removed
/// from the magnitude signal as `sqrt(|S^2 - sigma^2|)`. Non-finite voxels become zero.
/// Without correction the same outputs are written by a plain conversion.
pub fn rician(p: &mut Pipeline, ds: &Dataset, enabled: bool, extent: &Extent) -> Result<()> {
    if !enabled {
        p.run(ToolCommand::new("mrconvert")
            .arg("-export_grad_fsl").output("dwi_designer.bvec").output("dwi_designer.bval")
            .arg("dwism.mif")
            .output("dwi_designer.nii"))?;
        return Ok(());
    }

    let shells = ds.gradients.shells_up_to(p.params().rician_max_bval);
    log::info!("rician bias correction using shells {}", format_shells(&shells));
    p.run(ToolCommand::new("dwiextract")
        .arg("-shell").arg(format_shells(&shells))
        .arg("dwi.mif")
        .output("dwilowb.mif"))?;
    p.run(ToolCommand::new("dwidenoise")
        .arg("-extent").arg(extent.to_string())
        .arg("-noise").output("lowbnoisemap.mif")
        .arg("dwilowb.mif")
        .output("tmp.mif"))?;
    p.ws().remove("tmp.mif")?;

    p.run(ToolCommand::new("mrcalc")
        .args(["dwism.mif", "2", "-pow", "lowbnoisemap.mif", "2", "-pow", "-sub", "-abs", "-sqrt", "-"])
        .pipe(ToolCommand::new("mrcalc")
            .args(["-", "-finite", "-", "0", "-if"])
            .output("dwi_designer.nii")))?;
    p.run(ToolCommand::new("mrinfo")
        .arg("-export_grad_fsl").output("dwi_designer.bvec").output("dwi_designer.bval")
        .arg("dwism.mif"))?;
    Ok(())
}
