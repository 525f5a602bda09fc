use crate::error::Result;
use crate::nifti::gunzip;
use crate::pipeline::{Dataset, Pipeline};
use crate::prealign::extract_series;
use crate::tools::ToolCommand;

fn dwibiascorrect(source: &str, target: &str) -> ToolCommand {
    ToolCommand::new("dwibiascorrect").args(["-fsl", source]).output(target)
}

/// B1 field inhomogeneity correction with FSL FAST, `dwiec.mif -> dwibc.mif`. Each input
/// series gets its own bias field since the coil may have moved between acquisitions.
pub fn b1correct(p: &mut Pipeline, ds: &Dataset, enabled: bool) -> Result<()> {
    if !enabled {
        return p.bypass_move("dwiec.mif", "dwibc.mif");
    }
    if !ds.is_multi_series() {
        log::info!("b1 bias correction");
        p.run(dwibiascorrect("dwiec.mif", "dwibc.mif"))?;
        return Ok(());
    }

    log::info!("b1 bias correction of {} series", ds.series.len());
    let mut corrected = vec![];
    for idx in 0..ds.series.len() {
        let series = format!("dwiec{idx}.mif");
        let target = format!("dwibc{idx}.mif");
        extract_series(p, ds, idx, "dwiec.mif", &series)?;
        p.run(dwibiascorrect(&series, &target))?;
        corrected.push(target);
    }
    p.run(ToolCommand::new("mrcat").args(["-axis", "3"]).args(&corrected).output("dwibc.mif"))?;
    Ok(())
}

/// Brain extraction on the mean b=0 image. Leaves `brain{sfx}` and `brain_mask{sfx}` in
/// the scratch dir, with a compressed NIfTI mask unpacked to `brain_mask.nii`.
pub fn brain_mask(p: &mut Pipeline) -> Result<()> {
    log::info!("computing brain mask");
    p.run(ToolCommand::new("dwiextract").args(["-bzero", "dwibc.mif", "-"])
        .pipe(ToolCommand::new("mrmath").args(["-axis", "3", "-", "mean"]).output("b0bc.nii")))?;

    let brain = p.fsl_file("brain");
    let mask = p.fsl_file("brain_mask");
    let fraction = p.params().bet_fraction.to_string();
    p.run(ToolCommand::new("bet")
        .arg("b0bc.nii")
        .output(&brain)
        .args(["-m", "-f"])
        .arg(fraction)
        .produces(&mask))?;

    if mask.ends_with(".nii.gz") {
        let ws = p.ws();
        gunzip(ws.path(&mask), ws.path("brain_mask.nii"))?;
        ws.remove(&mask)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DesignerParams;
    use crate::gradient::GradientTable;
    use crate::series::VolumeRanges;
    use crate::test_runner::RecordingRunner;
    use crate::workspace::Workspace;

    fn dataset(counts: &[usize]) -> Dataset {
        let n = counts.iter().sum::<usize>();
        Dataset {
            size: vec![10, 10, 10, n],
            series: VolumeRanges::from_counts(counts),
            gradients: GradientTable::parse(&"0 0 0 0\n".repeat(n)).unwrap(),
        }
    }

    #[test]
    fn each_series_gets_its_own_field() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(parent.path(), false).unwrap();
        let params = DesignerParams::default();
        let mut runner = RecordingRunner::new(ws.dir());
        {
            let mut p = Pipeline::new(&mut runner, &ws, &params, ".nii");
            b1correct(&mut p, &dataset(&[2, 3]), true).unwrap();
        }
        assert_eq!(runner.calls, vec![
            "mrconvert -coord 3 0:1 dwiec.mif dwiec0.mif",
            "dwibiascorrect -fsl dwiec0.mif dwibc0.mif",
            "mrconvert -coord 3 2:4 dwiec.mif dwiec1.mif",
            "dwibiascorrect -fsl dwiec1.mif dwibc1.mif",
            "mrcat -axis 3 dwibc0.mif dwibc1.mif dwibc.mif",
        ]);
    }

    #[test]
    fn single_series_is_corrected_in_one_go() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(parent.path(), false).unwrap();
        let params = DesignerParams::default();
        let mut runner = RecordingRunner::new(ws.dir());
        {
            let mut p = Pipeline::new(&mut runner, &ws, &params, ".nii");
            b1correct(&mut p, &dataset(&[5]), true).unwrap();
        }
        assert_eq!(runner.calls, vec!["dwibiascorrect -fsl dwiec.mif dwibc.mif"]);
    }

    #[test]
    fn uncompressed_mask_is_left_alone() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(parent.path(), false).unwrap();
        let params = DesignerParams { bet_fraction: 0.3, ..Default::default() };
        let mut runner = RecordingRunner::new(ws.dir());
        {
            let mut p = Pipeline::new(&mut runner, &ws, &params, ".nii");
            brain_mask(&mut p).unwrap();
        }
        assert_eq!(runner.calls[1], "bet b0bc.nii brain.nii -m -f 0.3");
        assert!(ws.exists("brain_mask.nii"));
    }

    #[test]
    fn compressed_mask_is_unpacked() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(parent.path(), false).unwrap();
        let params = DesignerParams::default();
        let mut runner = RecordingRunner::new(ws.dir());
        {
            let mut p = Pipeline::new(&mut runner, &ws, &params, ".nii.gz");
            brain_mask(&mut p).unwrap();
        }
        assert!(ws.exists("brain.nii.gz"));
        assert!(ws.exists("brain_mask.nii"));
        assert!(!ws.exists("brain_mask.nii.gz"));
    }

    #[test]
    fn compressed_analyze_pair_is_kept_as_written() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(parent.path(), false).unwrap();
        let params = DesignerParams::default();
        let mut runner = RecordingRunner::new(ws.dir());
        {
            let mut p = Pipeline::new(&mut runner, &ws, &params, ".img.gz");
            brain_mask(&mut p).unwrap();
        }
        assert_eq!(runner.calls[1], "bet b0bc.nii brain.img.gz -m -f 0.25");
        assert!(ws.exists("brain_mask.img.gz"));
        assert!(!ws.exists("brain_mask.nii"));
    }
}
