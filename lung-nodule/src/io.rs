//! NIfTI 格式体数据读写.
//!
//! NIfTI 的物理坐标系为 RAS, 而本 crate 内部统一使用 LPS, 读写时在此转换.

use std::path::Path;

use log::{debug, warn};
use ndarray::Ix3;
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::data::IDENTITY_DIRECTION;
use crate::{CtVolume, Grid, GridAttr, InputError, Point3, SegResult, Volume};

/// 从 header 中解析出 LPS 坐标系下的原点和方向矩阵 (列已归一化), 以及分辨率 `(x, y, z)`.
fn geometry_from_header(h: &NiftiHeader) -> (Point3, [[f64; 3]; 3], [f64; 3]) {
    let pixdim = [h.pixdim[1], h.pixdim[2], h.pixdim[3]].map(|v| {
        let v = f64::from(v).abs();
        if v > 0.0 {
            v
        } else {
            1.0
        }
    });

    // m[r][c]: RAS 物理轴 r, 索引轴 c (未归一化).
    let (m, origin) = if h.sform_code > 0 {
        let rows = [h.srow_x, h.srow_y, h.srow_z].map(|r| r.map(f64::from));
        let m: [[f64; 3]; 3] = std::array::from_fn(|r| [rows[r][0], rows[r][1], rows[r][2]]);
        (m, [rows[0][3], rows[1][3], rows[2][3]])
    } else if h.qform_code > 0 {
        let (b, c, d) = (
            f64::from(h.quatern_b),
            f64::from(h.quatern_c),
            f64::from(h.quatern_d),
        );
        let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();
        let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let scale = [pixdim[0], pixdim[1], pixdim[2] * qfac];
        let m = std::array::from_fn(|i| std::array::from_fn(|j| r[i][j] * scale[j]));
        let origin = [h.quatern_x, h.quatern_y, h.quatern_z].map(f64::from);
        (m, origin)
    } else {
        warn!("NIfTI header has neither sform nor qform, assuming identity orientation");
        let m = std::array::from_fn(|i| std::array::from_fn(|j| IDENTITY_DIRECTION[i][j] * pixdim[j]));
        (m, [0.0; 3])
    };

    let mut spacing = [0.0; 3];
    let mut direction = [[0.0; 3]; 3];
    for c in 0..3 {
        let norm = (0..3).map(|r| m[r][c] * m[r][c]).sum::<f64>().sqrt();
        let norm = if norm > 0.0 { norm } else { pixdim[c] };
        spacing[c] = norm;
        for r in 0..3 {
            direction[r][c] = m[r][c] / norm;
        }
    }
    // RAS -> LPS.
    for r in 0..2 {
        direction[r] = direction[r].map(|v| -v);
    }
    let origin = [-origin[0], -origin[1], origin[2]];
    (origin, direction, spacing)
}

/// 读取 nii / nii.gz 格式的三维体数据. HU 值以 `f32` 保存, 缩放系数已经应用.
///
/// `ignore_direction` 为 `true` 时丢弃方向矩阵, 视为单位阵.
pub fn read_volume<P: AsRef<Path>>(path: P, ignore_direction: bool) -> SegResult<CtVolume> {
    let path = path.as_ref();
    let obj = ReaderOptions::new().read_file(path)?;
    let header = obj.header().clone();
    if header.dim[0] != 3 {
        return Err(InputError::Unsupported(format!(
            "{} has {} dimensions, only 3D volumes are supported",
            path.display(),
            header.dim[0]
        ))
        .into());
    }

    // [W, H, z] -> [z, H, W].
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()?
        .into_dimensionality::<Ix3>()?
        .permuted_axes([2, 1, 0])
        .as_standard_layout()
        .into_owned();

    let (origin, direction, [sx, sy, sz]) = geometry_from_header(&header);
    let direction = if ignore_direction {
        IDENTITY_DIRECTION
    } else {
        direction
    };
    let grid = Grid::new(data.dim(), [sz, sy, sx])
        .with_origin(origin)
        .with_direction(direction);
    debug!(
        "read {}: shape {:?}, spacing {:?}",
        path.display(),
        grid.shape(),
        grid.spacing()
    );
    Volume::new(grid, data)
}

/// 把体数据写为 nii / nii.gz 格式 (按扩展名决定是否压缩). 方向信息写入 sform.
pub fn write_volume<P: AsRef<Path>>(volume: &Volume<f32>, path: P) -> SegResult<()> {
    let path = path.as_ref();
    let grid = volume.grid();
    let [sz, sy, sx] = grid.spacing();
    let spacing = [sx, sy, sz];
    let d = grid.direction();
    let o = grid.origin();

    // LPS -> RAS.
    let sign = [-1.0, -1.0, 1.0];
    let row = |r: usize| -> [f32; 4] {
        let mut out = [0.0_f32; 4];
        for c in 0..3 {
            out[c] = (sign[r] * d[r][c] * spacing[c]) as f32;
        }
        out[3] = (sign[r] * o[r]) as f32;
        out
    };

    let header = NiftiHeader {
        pixdim: [1.0, sx as f32, sy as f32, sz as f32, 1.0, 1.0, 1.0, 1.0],
        sform_code: 1,
        qform_code: 0,
        srow_x: row(0),
        srow_y: row(1),
        srow_z: row(2),
        // 毫米.
        xyzt_units: 2,
        ..NiftiHeader::default()
    };

    // [z, H, W] -> [W, H, z].
    let data = volume.data().reversed_axes();
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&data)
        .map_err(|e| InputError::Write(format!("{}: {e}", path.display())))?;
    debug!("wrote {}", path.display());
    Ok(())
}
