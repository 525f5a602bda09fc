use crate::error::{DesignerError, Result};
use ndarray::{Array2, Axis, ShapeBuilder};
use std::fs;
use std::path::Path;

/// largest b-value mrtrix treats as b=0
pub const B0_THRESHOLD: f64 = 10.;

fn read_values(txt_file: &Path) -> Result<Vec<f64>> {
    let s = fs::read_to_string(txt_file).map_err(|e| DesignerError::io(txt_file, e))?;
    s.split_ascii_whitespace().map(|tok| {
        tok.parse::<f64>().map_err(|_| DesignerError::InvalidGradientFile {
            path: txt_file.to_path_buf(),
            reason: format!("cannot parse {tok:?} as a number"),
        })
    }).collect()
}

/// read b-vectors from an FSL bvec file (3 rows of N whitespace delimited values)
pub fn read_bvecs(txt_file: impl AsRef<Path>) -> Result<Vec<[f64; 3]>> {
    let txt_file = txt_file.as_ref();
    let values = read_values(txt_file)?;
    if values.len() % 3 != 0 {
        return Err(DesignerError::InvalidGradientFile {
            path: txt_file.to_path_buf(),
            reason: format!("{} values is not divisible by 3", values.len()),
        });
    }
    let n_bvecs = values.len() / 3;
    // rows of the file are the x, y and z components, so the values land column-major
    let a = Array2::<f64>::from_shape_vec((n_bvecs, 3).f(), values)
        .map_err(|e| DesignerError::InvalidGradientFile { path: txt_file.to_path_buf(), reason: e.to_string() })?;
    Ok(a.axis_iter(Axis(0)).map(|bvec| {
        let mut v = [0., 0., 0.];
        v.iter_mut().zip(bvec.iter()).for_each(|(a, &b)| *a = b);
        v
    }).collect())
}

/// read b-values from an FSL bval file
pub fn read_bvals(txt_file: impl AsRef<Path>) -> Result<Vec<f64>> {
    read_values(txt_file.as_ref())
}

/// check that an FSL bvec/bval pair describes the same number of volumes
pub fn check_fsl_pair(bvecs: &[[f64; 3]], bvals: &[f64]) -> Result<usize> {
    if bvecs.len() != bvals.len() {
        return Err(DesignerError::BvecBvalMismatch { bvecs: bvecs.len(), bvals: bvals.len() });
    }
    Ok(bvals.len())
}

/// rounds a b-value to the nearest multiple of 10, ties going to the even multiple
pub fn round_bvalue(b: f64) -> f64 {
    (b / 10.).round_ties_even() * 10.
}

/// comma separated shell list as taken by `dwiextract -shell`
pub fn format_shells(shells: &[f64]) -> String {
    shells.iter().map(|b| format!("{}", b)).collect::<Vec<_>>().join(",")
}

/// The mrtrix gradient table of an image: one `[x, y, z, b]` row per volume.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTable {
    rows: Vec<[f64; 4]>,
}

impl GradientTable {
    /// parses the output of `mrinfo -dwgrad`, returning the first offending line on failure
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let mut rows = vec![];
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let row = line.split_ascii_whitespace()
                .map(|tok| tok.parse::<f64>().ok())
                .collect::<Option<Vec<_>>>()
                .and_then(|values| <[f64; 4]>::try_from(values.as_slice()).ok())
                .ok_or_else(|| line.to_string())?;
            rows.push(row);
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// fails unless there is exactly one row per volume
    pub fn validate(&self, n_volumes: usize) -> Result<()> {
        if self.is_empty() {
            return Err(DesignerError::NoGradientTable);
        }
        if self.len() != n_volumes {
            return Err(DesignerError::GradientMismatch { table: self.len(), volumes: n_volumes });
        }
        Ok(())
    }

    pub fn bvalues(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r[3]).collect()
    }

    pub fn b0_mask(&self, b_tolerance: f64) -> Vec<bool> {
        self.rows.iter().map(|r| r[3] <= b_tolerance).collect()
    }

    /// unique b-values rounded to the nearest 10, ascending. Anything at or below
    /// [B0_THRESHOLD] is the b=0 shell.
    pub fn shells(&self) -> Vec<f64> {
        let mut shells = self.bvalues().into_iter()
            .map(|b| if b <= B0_THRESHOLD { 0. } else { round_bvalue(b) })
            .collect::<Vec<_>>();
        shells.sort_by(|a, b| a.total_cmp(b));
        shells.dedup();
        shells
    }

    pub fn shells_up_to(&self, max_bval: f64) -> Vec<f64> {
        self.shells().into_iter().filter(|&b| b <= max_bval).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DWGRAD: &str = "0 0 0 0\n\
        0.5773 0.5773 0.5773 995\n\
        1 0 0 1005\n\
        0 1 0 2000\n\
        0 0 1 2996\n\
        0 0 0 5\n";

    #[test]
    fn bvecs_are_read_row_major_from_fsl_layout() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "0 1 0 0.6").unwrap();
        writeln!(f, "0 0 1 0.8").unwrap();
        writeln!(f, "0 0 0 0").unwrap();
        let bvecs = read_bvecs(f.path()).unwrap();
        assert_eq!(bvecs, vec![[0., 0., 0.], [1., 0., 0.], [0., 1., 0.], [0.6, 0.8, 0.]]);
    }

    #[test]
    fn bvecs_with_stray_values_are_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "0 1\n0 0\n0").unwrap();
        assert!(matches!(read_bvecs(f.path()), Err(DesignerError::InvalidGradientFile { .. })));
    }

    #[test]
    fn fsl_pair_counts_must_agree() {
        let bvecs = vec![[0., 0., 0.], [1., 0., 0.]];
        assert_eq!(check_fsl_pair(&bvecs, &[0., 1000.]).unwrap(), 2);
        assert!(matches!(
            check_fsl_pair(&bvecs, &[0.]),
            Err(DesignerError::BvecBvalMismatch { bvecs: 2, bvals: 1 })
        ));
    }

    #[test]
    fn shells_round_to_tens() {
        let table = GradientTable::parse(DWGRAD).unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.shells(), vec![0., 1000., 2000., 3000.]);
        assert_eq!(format_shells(&table.shells_up_to(2000.)), "0,1000,2000");
        assert_eq!(table.b0_mask(50.), vec![true, false, false, false, false, true]);
    }

    #[test]
    fn near_zero_bvalues_join_the_b0_shell() {
        let table = GradientTable::parse("0 0 0 0\n1 0 0 1000\n0 0 0 8\n0 1 0 2003\n0 0 0 10\n").unwrap();
        assert_eq!(table.shells(), vec![0., 1000., 2000.]);
        assert_eq!(format_shells(&table.shells_up_to(1000.)), "0,1000");
        let low = GradientTable::parse("0 0 0 12\n1 0 0 1000\n").unwrap();
        assert_eq!(low.shells(), vec![10., 1000.]);
    }

    #[test]
    fn rounding_ties_go_to_even() {
        assert_eq!(round_bvalue(15.), 20.);
        assert_eq!(round_bvalue(25.), 20.);
        assert_eq!(round_bvalue(1004.9), 1000.);
    }

    #[test]
    fn table_validation() {
        let table = GradientTable::parse(DWGRAD).unwrap();
        assert!(table.validate(6).is_ok());
        assert!(matches!(table.validate(7), Err(DesignerError::GradientMismatch { table: 6, volumes: 7 })));
        let empty = GradientTable::parse("\n").unwrap();
        assert!(matches!(empty.validate(1), Err(DesignerError::NoGradientTable)));
    }

    #[test]
    fn malformed_table_line() {
        assert_eq!(GradientTable::parse("0 0 0 0\n0 0 1\n"), Err("0 0 1".to_string()));
        assert_eq!(GradientTable::parse("0 0 x 1\n"), Err("0 0 x 1".to_string()));
    }
}
