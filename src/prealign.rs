use crate::error::Result;
use crate::pipeline::{Dataset, Pipeline};
use crate::tools::ToolCommand;

/// splits series `idx` out of `source` into `target`
pub(crate) fn extract_series(p: &mut Pipeline, ds: &Dataset, idx: usize, source: &str, target: &str) -> Result<()> {
    p.run(ToolCommand::new("mrconvert")
        .arg("-coord").arg("3").arg(ds.series.coord_selector(idx))
        .arg(source)
        .output(target))?;
    Ok(())
}

/// first b=0 volume of `source`
pub(crate) fn extract_first_b0(p: &mut Pipeline, source: &str, target: &str) -> Result<()> {
    p.run(ToolCommand::new("dwiextract").args(["-bzero", source, "-"])
        .pipe(ToolCommand::new("mrconvert").args(["-coord", "3", "0", "-"]).output(target)))?;
    Ok(())
}

/// Rigid alignment of every series onto the first one before eddy, using each series'
/// first b=0 volume. `dwigc.mif -> dwitf.mif`
pub fn prealign(p: &mut Pipeline, ds: &Dataset, enabled: bool) -> Result<()> {
    if !enabled {
        return p.bypass_move("dwigc.mif", "dwitf.mif");
    }
    if !ds.is_multi_series() {
        log::info!("single input series, nothing to prealign");
        return p.bypass_copy("dwigc.mif", "dwitf.mif");
    }

    log::info!("rigidly aligning {} series", ds.series.len());
    let mut aligned = vec!["dwigc0.mif".to_string()];
    for idx in 0..ds.series.len() {
        let series = format!("dwigc{idx}.mif");
        let b0 = format!("b0gc{idx}.mif");
        extract_series(p, ds, idx, "dwigc.mif", &series)?;
        extract_first_b0(p, &series, &b0)?;
        if idx == 0 {
            continue;
        }
        let xform = format!("rigidXform{idx}to0.txt");
        let moved = format!("dwitf{idx}.mif");
        p.run(ToolCommand::new("mrregister")
            .args(["-type", "rigid", "-noreorientation", "-rigid"])
            .output(&xform)
            .arg(&b0)
            .arg("b0gc0.mif"))?;
        p.run(ToolCommand::new("mrtransform")
            .arg("-linear").arg(&xform)
            .arg(&series)
            .output(&moved))?;
        aligned.push(moved);
    }
    p.run(ToolCommand::new("mrcat").args(["-axis", "3"]).args(&aligned).output("dwitf.mif"))?;
    Ok(())
}
