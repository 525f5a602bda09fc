use crate::error::{DesignerError, Result};
use crate::gradient::{check_fsl_pair, read_bvals, read_bvecs};
use crate::nifti;
use std::ops::Range;
use std::path::{Path, PathBuf};

const COMPOUND_EXTENSIONS: [&str; 3] = [".tar.gz", ".tar.bz2", ".nii.gz"];

/// splits a file name into stem and extension, keeping compound extensions whole
pub fn split_ext(name: &str) -> (&str, &str) {
    for ext in COMPOUND_EXTENSIONS {
        if let Some(stem) = name.strip_suffix(ext) {
            return (stem, &name[stem.len()..]);
        }
    }
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => name.split_at(name.len() - ext.len() - 1),
        None => (name, ""),
    }
}

/// One acquisition: an image plus its FSL gradient pair.
#[derive(Debug, Clone, PartialEq)]
pub struct DwiSeries {
    pub image: PathBuf,
    pub bvec: PathBuf,
    pub bval: PathBuf,
}

impl DwiSeries {
    /// locates `<stem>.bvec` and `<stem>.bval` next to the image
    pub fn from_image(image: impl Into<PathBuf>) -> Result<Self> {
        let image = image.into();
        let name = image.to_string_lossy().into_owned();
        let (stem, _) = split_ext(&name);
        let bvec = PathBuf::from(format!("{stem}.bvec"));
        let bval = PathBuf::from(format!("{stem}.bval"));
        for f in [&bvec, &bval] {
            if !f.is_file() {
                return Err(DesignerError::MissingGradientTable(f.clone()));
            }
        }
        Ok(Self { image, bvec, bval })
    }

    pub fn is_nifti(&self) -> bool {
        let name = self.image.to_string_lossy();
        name.ends_with(".nii") || name.ends_with(".nii.gz")
    }

    /// checks the gradient files against each other and, for NIfTI images, against the
    /// number of volumes in the header. Returns the volume count.
    pub fn check(&self) -> Result<usize> {
        let bvecs = read_bvecs(&self.bvec)?;
        let bvals = read_bvals(&self.bval)?;
        let n = check_fsl_pair(&bvecs, &bvals)?;
        if self.is_nifti() {
            let dims = nifti::read_dims(&self.image)?;
            let volumes = nifti::volume_count(&dims);
            if volumes != n {
                return Err(DesignerError::GradientMismatch { table: n, volumes });
            }
        }
        Ok(n)
    }
}

fn expand_entry(entry: &str, base: &Path, fallback_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let direct = base.join(entry);
    let candidate = match fallback_dir {
        Some(dir) if !direct.exists() && Path::new(entry).is_relative() => dir.join(entry),
        _ => direct,
    };
    let pattern = candidate.to_string_lossy().into_owned();
    if !pattern.contains(['*', '?', '[']) {
        return Ok(vec![candidate]);
    }
    let mut paths = glob::glob(&pattern)
        .map_err(|e| DesignerError::invalid_argument(format!("invalid input pattern {entry:?}: {e}")))?
        .filter_map(|p| p.ok())
        .collect::<Vec<_>>();
    if paths.is_empty() {
        return Err(DesignerError::invalid_argument(format!("no input matches {entry:?}")));
    }
    paths.sort();
    Ok(paths)
}

/// Resolves the comma separated input argument into one series per acquisition.
///
/// A string naming an existing file is a single series. Otherwise each comma separated
/// entry is taken relative to `cwd`, falling back to the directory of the first entry when
/// it is not found there; entries may be glob patterns, expanded in sorted order.
pub fn parse_input_list(input: &str, cwd: &Path) -> Result<Vec<DwiSeries>> {
    let whole = cwd.join(input);
    if whole.is_file() {
        return Ok(vec![DwiSeries::from_image(whole)?]);
    }

    let entries = input.split(',').map(str::trim).filter(|e| !e.is_empty()).collect::<Vec<_>>();
    let Some(first) = entries.first() else {
        return Err(DesignerError::invalid_argument("no input series given"));
    };
    let first_dir = cwd.join(first).parent().map(Path::to_path_buf);

    let mut series = vec![];
    for (i, entry) in entries.iter().enumerate() {
        let fallback = if i == 0 { None } else { first_dir.as_deref() };
        for image in expand_entry(entry, cwd, fallback)? {
            if !image.is_file() {
                return Err(DesignerError::invalid_argument(format!("input image {} not found", image.display())));
            }
            series.push(DwiSeries::from_image(image)?);
        }
    }
    Ok(series)
}

/// Where each series lives along the volume axis of the concatenated image.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeRanges {
    ranges: Vec<Range<usize>>,
}

impl VolumeRanges {
    pub fn from_counts(counts: &[usize]) -> Self {
        let mut start = 0;
        let ranges = counts.iter().map(|&n| {
            let r = start..start + n;
            start += n;
            r
        }).collect();
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn range(&self, series: usize) -> Range<usize> {
        self.ranges[series].clone()
    }

    pub fn total(&self) -> usize {
        self.ranges.last().map(|r| r.end).unwrap_or(0)
    }

    /// `first:last` selector for `mrconvert -coord 3`
    pub fn coord_selector(&self, series: usize) -> String {
        let r = self.range(series);
        format!("{}:{}", r.start, r.end.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nifti::tests::nifti1_header;
    use std::fs;

    fn write_series(dir: &Path, stem: &str, ext: &str, volumes: i16) -> PathBuf {
        let image = dir.join(format!("{stem}{ext}"));
        fs::write(&image, nifti1_header(&[4, 4, 2, volumes])).unwrap();
        let n = volumes as usize;
        let bval = (0..n).map(|i| if i == 0 { "0".to_string() } else { "1000".to_string() }).collect::<Vec<_>>().join(" ");
        let row = |v: &str| vec![v; n].join(" ");
        fs::write(dir.join(format!("{stem}.bval")), bval).unwrap();
        fs::write(dir.join(format!("{stem}.bvec")), format!("{}\n{}\n{}\n", row("1"), row("0"), row("0"))).unwrap();
        image
    }

    #[test]
    fn compound_extensions() {
        assert_eq!(split_ext("dwi.nii.gz"), ("dwi", ".nii.gz"));
        assert_eq!(split_ext("/data/sub-01/dwi.nii"), ("/data/sub-01/dwi", ".nii"));
        assert_eq!(split_ext("archive.tar.bz2"), ("archive", ".tar.bz2"));
        assert_eq!(split_ext("dwi.mif"), ("dwi", ".mif"));
        assert_eq!(split_ext("dwi"), ("dwi", ""));
    }

    #[test]
    fn single_series_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_series(dir.path(), "dwi", ".nii.gz", 3);
        let series = parse_input_list("dwi.nii.gz", dir.path()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].bvec, dir.path().join("dwi.bvec"));
        assert_eq!(series[0].check().unwrap(), 3);
    }

    #[test]
    fn later_entries_resolve_against_first_directory() {
        let cwd = tempfile::tempdir().unwrap();
        let data = cwd.path().join("data");
        fs::create_dir(&data).unwrap();
        write_series(&data, "dwi1", ".nii", 2);
        write_series(&data, "dwi2", ".nii", 3);
        let series = parse_input_list("data/dwi1.nii,dwi2.nii", cwd.path()).unwrap();
        assert_eq!(series.iter().map(|s| s.image.clone()).collect::<Vec<_>>(),
                   vec![cwd.path().join("data/dwi1.nii"), data.join("dwi2.nii")]);
    }

    #[test]
    fn glob_entries_expand_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_series(dir.path(), "run2", ".nii", 2);
        write_series(dir.path(), "run1", ".nii", 2);
        let series = parse_input_list("run*.nii", dir.path()).unwrap();
        assert_eq!(series.len(), 2);
        assert!(series[0].image.ends_with("run1.nii"));
        assert!(parse_input_list("nothing*.nii", dir.path()).is_err());
    }

    #[test]
    fn missing_gradient_files() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_series(dir.path(), "dwi", ".nii", 2);
        fs::remove_file(dir.path().join("dwi.bval")).unwrap();
        assert!(matches!(DwiSeries::from_image(image), Err(DesignerError::MissingGradientTable(p)) if p.ends_with("dwi.bval")));
    }

    #[test]
    fn header_volume_count_must_match_bvals() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_series(dir.path(), "dwi", ".nii", 4);
        fs::write(dir.path().join("dwi.bval"), "0 1000 1000").unwrap();
        fs::write(dir.path().join("dwi.bvec"), "1 1 1\n0 0 0\n0 0 0\n").unwrap();
        let s = DwiSeries::from_image(image).unwrap();
        assert!(matches!(s.check(), Err(DesignerError::GradientMismatch { table: 3, volumes: 4 })));
    }

    #[test]
    fn volume_ranges() {
        let r = VolumeRanges::from_counts(&[33, 65, 10]);
        assert_eq!(r.len(), 3);
        assert_eq!(r.range(1), 33..98);
        assert_eq!(r.coord_selector(0), "0:32");
        assert_eq!(r.coord_selector(2), "98:107");
        assert_eq!(r.total(), 108);
    }
}
