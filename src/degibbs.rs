use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::tools::ToolCommand;

/// Gibbs ringing removal by local subvoxel shifts, `dwidn.mif -> dwigc.mif`
pub fn degibbs(p: &mut Pipeline, enabled: bool) -> Result<()> {
    if !enabled {
        return p.bypass_move("dwidn.mif", "dwigc.mif");
    }
    log::info!("removing gibbs ringing");
    let params = p.params();
    let cmd = ToolCommand::new("mrdegibbs")
        .arg("-nshifts").arg(params.degibbs_nshifts.to_string())
        .arg("-minW").arg(params.degibbs_min_w.to_string())
        .arg("-maxW").arg(params.degibbs_max_w.to_string())
        .arg("dwidn.mif")
        .output("dwigc.mif");
    p.run(cmd)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DesignerParams;
    use crate::test_runner::RecordingRunner;
    use crate::workspace::Workspace;

    #[test]
    fn degibbs_with_configured_window() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(parent.path(), false).unwrap();
        let params = DesignerParams { degibbs_nshifts: 30, ..Default::default() };
        let mut runner = RecordingRunner::new(ws.dir());
        {
            let mut p = Pipeline::new(&mut runner, &ws, &params, ".nii");
            degibbs(&mut p, true).unwrap();
        }
        assert_eq!(runner.calls, vec!["mrdegibbs -nshifts 30 -minW 1 -maxW 3 dwidn.mif dwigc.mif"]);
    }

    #[test]
    fn disabled_degibbs_moves_the_input() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::create(parent.path(), false).unwrap();
        std::fs::write(ws.path("dwidn.mif"), b"dn").unwrap();
        let params = DesignerParams::default();
        let mut runner = RecordingRunner::new(ws.dir());
        let mut p = Pipeline::new(&mut runner, &ws, &params, ".nii");
        degibbs(&mut p, false).unwrap();
        assert!(!ws.exists("dwidn.mif"));
        assert_eq!(std::fs::read(ws.path("dwigc.mif")).unwrap(), b"dn");
        assert!(p.history().is_empty());
    }
}
