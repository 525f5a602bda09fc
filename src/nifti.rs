//! Just enough NIfTI to sanity-check inputs before handing them to mrtrix, and to
//! unpack the gzipped images FSL leaves behind.

use crate::error::{DesignerError, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const NIFTI1_HEADER_SIZE: usize = 348;
const NIFTI2_HEADER_SIZE: usize = 540;

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn invalid(path: &Path, reason: impl Into<String>) -> DesignerError {
    DesignerError::InvalidNifti { path: path.to_path_buf(), reason: reason.into() }
}

/// read the first `n` bytes of a possibly gzipped file
fn read_prefix(path: &Path, n: usize) -> Result<Vec<u8>> {
    let mut f = File::open(path).map_err(|e| DesignerError::io(path, e))?;
    let mut magic = [0u8; 2];
    let got = f.read(&mut magic).map_err(|e| DesignerError::io(path, e))?;
    drop(f);

    let f = BufReader::new(File::open(path).map_err(|e| DesignerError::io(path, e))?);
    let mut reader: Box<dyn Read> = if is_gzip(&magic[..got]) {
        Box::new(GzDecoder::new(f))
    } else {
        Box::new(f)
    };
    let mut buf = Vec::with_capacity(n);
    reader.by_ref().take(n as u64).read_to_end(&mut buf).map_err(|e| DesignerError::io(path, e))?;
    Ok(buf)
}

fn dims_from<B: ByteOrder>(header: &[u8], nifti2: bool) -> Vec<i64> {
    if nifti2 {
        (0..8).map(|i| B::read_i64(&header[16 + 8 * i..])).collect()
    } else {
        (0..8).map(|i| B::read_i16(&header[40 + 2 * i..]) as i64).collect()
    }
}

/// image dimensions (`dim[1..=dim[0]]`) of a NIfTI-1 or NIfTI-2 file, gzipped or not
pub fn read_dims(path: impl AsRef<Path>) -> Result<Vec<usize>> {
    let path = path.as_ref();
    let header = read_prefix(path, NIFTI2_HEADER_SIZE)?;
    if header.len() < NIFTI1_HEADER_SIZE {
        return Err(invalid(path, format!("file too small ({} bytes)", header.len())));
    }

    let le = LittleEndian::read_i32(&header[0..4]);
    let be = BigEndian::read_i32(&header[0..4]);
    let raw = match (le, be) {
        (348, _) => dims_from::<LittleEndian>(&header, false),
        (_, 348) => dims_from::<BigEndian>(&header, false),
        (540, _) | (_, 540) if header.len() < NIFTI2_HEADER_SIZE => {
            return Err(invalid(path, "truncated NIfTI-2 header"));
        }
        (540, _) => dims_from::<LittleEndian>(&header, true),
        (_, 540) => dims_from::<BigEndian>(&header, true),
        _ => return Err(invalid(path, format!("unrecognised sizeof_hdr {le}"))),
    };

    let ndim = raw[0];
    if !(1..=7).contains(&ndim) {
        return Err(invalid(path, format!("dim[0] = {ndim} is out of range")));
    }
    raw[1..=ndim as usize].iter().map(|&d| {
        usize::try_from(d).map_err(|_| invalid(path, format!("negative dimension {d}")))
    }).collect()
}

/// number of volumes along the 4th axis (a 3-D image is a single volume)
pub fn volume_count(dims: &[usize]) -> usize {
    dims.get(3).copied().unwrap_or(1)
}

/// decompress a gzip file
pub fn gunzip(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let f = File::open(src).map_err(|e| DesignerError::io(src, e))?;
    let mut decoder = GzDecoder::new(BufReader::new(f));
    let mut out = File::create(dst).map_err(|e| DesignerError::io(dst, e))?;
    std::io::copy(&mut decoder, &mut out).map_err(|e| DesignerError::io(src, e))?;
    Ok(())
}
