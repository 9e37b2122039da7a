//! 读取 DICOM 序列目录.
//!
//! 仅支持未压缩的传输语法. 目录中包含多个序列时, 按 `SeriesInstanceUID`
//! 排序后取第一个.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ::dicom::dictionary_std::tags;
use ::dicom::object::{open_file, DefaultDicomObject, Tag};
use log::{debug, info, warn};
use lung_nodule::{CtVolume, Grid, InputError, SegError, SegResult, Volume};
use ndarray::{Array3, Axis};

/// 支持的传输语法: 隐式小端, 显式小端, 显式大端.
const UNCOMPRESSED_TRANSFER_SYNTAXES: [&str; 3] =
    ["1.2.840.10008.1.2", "1.2.840.10008.1.2.1", "1.2.840.10008.1.2.2"];

/// 单个切片, 像素已换算为 HU.
#[derive(Debug, Clone)]
pub struct Slice {
    /// `ImagePositionPatient`.
    pub position: [f64; 3],
    /// `ImageOrientationPatient`, 行方向余弦在前.
    pub orientation: [f64; 6],
    /// `PixelSpacing`, 即 (行间距, 列间距).
    pub pixel_spacing: [f64; 2],
    /// `SliceThickness`, 仅在单切片时用作层间距.
    pub thickness: Option<f64>,
    /// `(rows, cols)` 个 HU 值, 行优先.
    pub pixels: ndarray::Array2<f32>,
}

fn read_err<E: std::fmt::Display>(path: &Path) -> impl FnOnce(E) -> SegError + '_ {
    move |e| InputError::read_failed(path, e).into()
}

fn multi_f64(obj: &DefaultDicomObject, tag: Tag, path: &Path) -> SegResult<Vec<f64>> {
    obj.element(tag)
        .map_err(read_err(path))?
        .to_multi_float64()
        .map_err(read_err(path))
}

fn opt_f64(obj: &DefaultDicomObject, tag: Tag) -> Option<f64> {
    obj.element(tag).ok()?.to_float64().ok()
}

fn fixed<const N: usize>(v: Vec<f64>, name: &str, path: &Path) -> SegResult<[f64; N]> {
    v.try_into().map_err(|v: Vec<f64>| {
        InputError::Read(format!(
            "{}: {name} has {} values, expected {N}",
            path.display(),
            v.len()
        ))
        .into()
    })
}

/// 读取一个切片文件. 返回 `(SeriesInstanceUID, 切片)`.
pub fn read_slice(path: &Path) -> SegResult<(String, Slice)> {
    let obj = open_file(path).map_err(read_err(path))?;

    let ts = obj.meta().transfer_syntax().trim_end_matches('\0');
    if !UNCOMPRESSED_TRANSFER_SYNTAXES.contains(&ts) {
        return Err(InputError::Unsupported(format!(
            "{}: compressed transfer syntax {ts}",
            path.display()
        ))
        .into());
    }

    let series = obj
        .element(tags::SERIES_INSTANCE_UID)
        .map_err(read_err(path))?
        .to_str()
        .map_err(read_err(path))?
        .trim_end_matches('\0')
        .trim()
        .to_string();
    let int = |tag: Tag| -> SegResult<u16> {
        obj.element(tag)
            .map_err(read_err(path))?
            .to_int::<u16>()
            .map_err(read_err(path))
    };
    let rows = int(tags::ROWS)? as usize;
    let cols = int(tags::COLUMNS)? as usize;
    let signed = int(tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1;
    let bits = int(tags::BITS_ALLOCATED).unwrap_or(16);

    let position = fixed(multi_f64(&obj, tags::IMAGE_POSITION_PATIENT, path)?, "ImagePositionPatient", path)?;
    let orientation = fixed(
        multi_f64(&obj, tags::IMAGE_ORIENTATION_PATIENT, path)?,
        "ImageOrientationPatient",
        path,
    )?;
    let pixel_spacing = fixed(multi_f64(&obj, tags::PIXEL_SPACING, path)?, "PixelSpacing", path)?;
    let slope = opt_f64(&obj, tags::RESCALE_SLOPE).unwrap_or(1.0) as f32;
    let intercept = opt_f64(&obj, tags::RESCALE_INTERCEPT).unwrap_or(0.0) as f32;

    let raw = obj
        .element(tags::PIXEL_DATA)
        .map_err(read_err(path))?
        .to_multi_int::<i32>()
        .map_err(read_err(path))?;
    if raw.len() < rows * cols {
        return Err(InputError::Read(format!(
            "{}: expected {} pixels, found {}",
            path.display(),
            rows * cols,
            raw.len()
        ))
        .into());
    }
    let stored = |v: i32| -> f32 {
        match (signed, bits) {
            (true, 16) => f32::from(v as u16 as i16),
            (true, 8) => f32::from(v as u8 as i8),
            _ => v as f32,
        }
    };
    let pixels = ndarray::Array2::from_shape_fn((rows, cols), |(r, c)| {
        stored(raw[r * cols + c]) * slope + intercept
    });

    Ok((
        series,
        Slice {
            position,
            orientation,
            pixel_spacing,
            thickness: opt_f64(&obj, tags::SLICE_THICKNESS),
            pixels,
        },
    ))
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// 把同一序列的切片拼装为体数据. 切片按其在法向上的投影排序.
pub fn assemble(mut slices: Vec<Slice>, ignore_direction: bool) -> SegResult<CtVolume> {
    let Some(first) = slices.first() else {
        return Err(SegError::InvalidInput("no slices to assemble".into()));
    };
    let o = first.orientation;
    let row_cos = [o[0], o[1], o[2]];
    let col_cos = [o[3], o[4], o[5]];
    let normal = cross(row_cos, col_cos);
    let shape2 = first.pixels.dim();
    let [sh, sw] = first.pixel_spacing;

    if let Some(bad) = slices.iter().find(|s| s.pixels.dim() != shape2) {
        return Err(InputError::Unsupported(format!(
            "inconsistent slice size: {:?} vs {:?}",
            bad.pixels.dim(),
            shape2
        ))
        .into());
    }

    slices.sort_by(|a, b| dot(a.position, normal).total_cmp(&dot(b.position, normal)));
    let n = slices.len();
    let sz = if n > 1 {
        let span = dot(slices[n - 1].position, normal) - dot(slices[0].position, normal);
        span / (n - 1) as f64
    } else {
        slices[0].thickness.unwrap_or(1.0)
    };
    if sz <= 0.0 {
        return Err(InputError::Unsupported("duplicated slice positions".into()).into());
    }

    let views: Vec<_> = slices.iter().map(|s| s.pixels.view()).collect();
    let data: Array3<f32> = ndarray::stack(Axis(0), &views)?;
    let direction = if ignore_direction {
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
    } else {
        [0, 1, 2].map(|r| [row_cos[r], col_cos[r], normal[r]])
    };
    let grid = Grid::new(data.dim(), [sz, sh, sw])
        .with_origin(slices[0].position)
        .with_direction(direction);
    Volume::new(grid, data)
}

/// 读取目录中的 DICOM 序列. 无法解析的文件被跳过.
pub fn read_series_dir<P: AsRef<Path>>(dir: P, ignore_direction: bool) -> SegResult<CtVolume> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| InputError::read_failed(dir, e))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut series: BTreeMap<String, Vec<Slice>> = BTreeMap::new();
    let mut unsupported = None;
    for path in &paths {
        match read_slice(path) {
            Ok((uid, slice)) => series.entry(uid).or_default().push(slice),
            Err(SegError::Input(e @ InputError::Unsupported(_))) => {
                warn!("skip {}", e);
                unsupported.get_or_insert(e);
            }
            Err(e) => debug!("skip {}: {e}", path.display()),
        }
    }

    if series.len() > 1 {
        warn!("{} series found in {}, using the first one", series.len(), dir.display());
    }
    let Some((uid, slices)) = series.into_iter().next() else {
        return Err(match unsupported {
            Some(e) => e.into(),
            None => InputError::EmptySeries(dir.display().to_string()).into(),
        });
    };
    info!("reading series {uid}: {} slices", slices.len());
    assemble(slices, ignore_direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lung_nodule::GridAttr;
    use ndarray::Array2;

    fn slice(z: f64, value: f32) -> Slice {
        Slice {
            position: [-100.0, -50.0, z],
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            pixel_spacing: [0.7, 0.8],
            thickness: Some(2.5),
            pixels: Array2::from_elem((4, 5), value),
        }
    }

    #[test]
    fn test_assemble_sorts_slices() {
        let slices = vec![slice(5.0, 2.0), slice(0.0, 0.0), slice(2.5, 1.0)];
        let v = assemble(slices, false).unwrap();
        assert_eq!(v.shape(), (3, 4, 5));
        assert_eq!(v.pix_dim(), [2.5, 0.7, 0.8]);
        assert_eq!(v.grid().origin(), [-100.0, -50.0, 0.0]);
        assert_eq!(v[(0, 0, 0)], 0.0);
        assert_eq!(v[(2, 3, 4)], 2.0);
        assert!(v.grid().is_identity_direction());
    }

    #[test]
    fn test_assemble_direction() {
        // 冠状位采集: 行沿 x, 列沿 -z, 法向沿 y.
        let mut slices = vec![slice(0.0, 0.0), slice(0.0, 1.0)];
        for (i, s) in slices.iter_mut().enumerate() {
            s.orientation = [1.0, 0.0, 0.0, 0.0, 0.0, -1.0];
            s.position = [0.0, i as f64 * 3.0, 0.0];
        }
        let v = assemble(slices.clone(), false).unwrap();
        assert_eq!(v.pix_dim()[0], 3.0);
        let d = v.grid().direction();
        assert_eq!([d[0][0], d[1][0], d[2][0]], [1.0, 0.0, 0.0]);
        assert_eq!([d[0][1], d[1][1], d[2][1]], [0.0, 0.0, -1.0]);
        assert_eq!([d[0][2], d[1][2], d[2][2]], [0.0, 1.0, 0.0]);

        let v = assemble(slices, true).unwrap();
        assert!(v.grid().is_identity_direction());
    }

    #[test]
    fn test_single_slice_uses_thickness() {
        let v = assemble(vec![slice(0.0, 1.0)], false).unwrap();
        assert_eq!(v.pix_dim()[0], 2.5);
    }

    #[test]
    fn test_inconsistent_slices() {
        let mut bad = slice(1.0, 0.0);
        bad.pixels = Array2::zeros((3, 3));
        let err = assemble(vec![slice(0.0, 0.0), bad], false).unwrap_err();
        assert!(matches!(err, SegError::Input(InputError::Unsupported(_))));
    }

    #[test]
    fn test_empty_dir() {
        let dir = std::env::temp_dir().join("lung_nodule_empty_dicom_dir");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("notes.txt"), "not a dicom file").unwrap();
        let err = read_series_dir(&dir, false).unwrap_err();
        assert!(matches!(err, SegError::Input(InputError::EmptySeries(_))));
    }
}
