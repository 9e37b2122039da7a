//! 各向同性重采样.
//!
//! 在做重计算之前, 先把各向异性的 CT 体数据重采样到各向同性网格上.
//! 层内比目标分辨率更细时, 先在层内做高斯预平滑以满足 Nyquist 准则.
//! 也可以只把过厚的层按整数倍细分, 层内保持不变.

use log::{debug, info};
use ndarray::{Array3, ArrayView3, Zip};

use crate::consts::hu;
use crate::filters;
use crate::{CtVolume, Grid, GridAttr, SegError, SegResult, Volume};

/// 体数据重采样器.
///
/// 各向同性超采样优先; 未开启时可以只对过厚的层做整数倍细分.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VolumeResampler {
    supersample: bool,
    spacing: f64,
    anisotropy_threshold: Option<f64>,
}

impl Default for VolumeResampler {
    /// 不做重采样.
    fn default() -> Self {
        Self {
            supersample: false,
            spacing: 0.0,
            anisotropy_threshold: None,
        }
    }
}

/// 三线性插值. `c` 为连续索引 `(z, h, w)`; 越界 (半个体素以外) 时返回 `None`.
fn interpolate(data: ArrayView3<f32>, c: [f64; 3]) -> Option<f32> {
    let (nz, nh, nw) = data.dim();
    let n = [nz, nh, nw];
    if (0..3).any(|k| c[k] < -0.5 || c[k] >= n[k] as f64 - 0.5) {
        return None;
    }
    let mut lo = [0_usize; 3];
    let mut hi = [0_usize; 3];
    let mut t = [0.0_f64; 3];
    for k in 0..3 {
        let f = c[k].floor();
        t[k] = c[k] - f;
        let last = n[k] as i64 - 1;
        lo[k] = (f as i64).clamp(0, last) as usize;
        hi[k] = (f as i64 + 1).clamp(0, last) as usize;
    }
    let mut acc = 0.0;
    for corner in 0..8_usize {
        let mut weight = 1.0;
        let mut idx = [0_usize; 3];
        for k in 0..3 {
            // 第 k 位对应第 k 维: 0 取 lo, 1 取 hi.
            if corner >> k & 1 == 1 {
                idx[k] = hi[k];
                weight *= t[k];
            } else {
                idx[k] = lo[k];
                weight *= 1.0 - t[k];
            }
        }
        if weight > 0.0 {
            acc += weight * f64::from(data[(idx[0], idx[1], idx[2])]);
        }
    }
    Some(acc as f32)
}

impl VolumeResampler {
    /// 默认的各向异性阈值: 层间距超过最细分辨率的 2 倍时细分.
    pub const DEFAULT_ANISOTROPY_THRESHOLD: f64 = 2.0;

    /// 创建重采样器. `spacing` 为 0 时自动估计目标分辨率.
    pub fn new(supersample: bool, spacing: f64) -> Self {
        Self {
            supersample,
            spacing,
            anisotropy_threshold: None,
        }
    }

    /// 打开厚层细分. 某个方向的分辨率超过 `threshold` 倍最细分辨率时,
    /// 把该方向等分为最少的整数份, 使新分辨率不超过该界限.
    /// 小于 1 的阈值会细分所有方向. 各向同性超采样打开时不起作用.
    #[inline]
    pub fn with_thick_slice_resampling(mut self, threshold: f64) -> Self {
        self.anisotropy_threshold = Some(threshold);
        self
    }

    /// 是否执行各向同性超采样.
    #[inline]
    pub fn is_supersampling(&self) -> bool {
        self.supersample
    }

    /// 目标分辨率. 配置为 0 时取层内 (x) 与层间分辨率的几何平均.
    pub fn resolved_spacing(&self, grid: &Grid) -> f64 {
        if self.spacing > 0.0 {
            return self.spacing;
        }
        let [sz, _, sw] = grid.spacing();
        (sw * sz).sqrt()
    }

    /// 超采样前是否需要层内预平滑: 两个层内分辨率都比目标细时, 直接插值会产生混叠.
    pub fn needs_smoothing(&self, grid: &Grid) -> bool {
        if !self.supersample {
            return false;
        }
        let s = self.resolved_spacing(grid);
        let [_, sh, sw] = grid.spacing();
        sh < s && sw < s
    }

    /// 厚层细分时每个方向的等分份数. 不需要细分时为 `[1, 1, 1]`.
    pub fn subdivisions(&self, grid: &Grid) -> [usize; 3] {
        let spacing = grid.spacing();
        match self.anisotropy_threshold {
            Some(t) if !self.supersample && t.is_finite() && t > 0.0 => {
                let limit = t * spacing.into_iter().fold(f64::MAX, f64::min);
                // 容忍浮点误差, 使 2.5 / 1.25 这样的整数倍不会多分一份.
                spacing.map(|s| ((s / limit) * (1.0 - 1e-9)).ceil().max(1.0) as usize)
            }
            _ => [1; 3],
        }
    }

    /// 输出网格.
    ///
    /// 各向同性超采样: 层内 `floor(n * spacing / s)`, 层间 `floor((n - 1) * spacing / s)`,
    /// 均至少为 1. 厚层细分: 每个方向 `(n - 1) * k + 1`, 原有的层全部保留.
    pub fn output_grid(&self, grid: &Grid) -> Grid {
        let (nz, nh, nw) = grid.shape();
        let [sz, sh, sw] = grid.spacing();
        if !self.supersample {
            let [kz, kh, kw] = self.subdivisions(grid);
            let size = |n: usize, k: usize| n.saturating_sub(1) * k + 1;
            return Grid::new(
                (size(nz, kz), size(nh, kh), size(nw, kw)),
                [sz / kz as f64, sh / kh as f64, sw / kw as f64],
            )
            .with_origin(grid.origin())
            .with_direction(grid.direction());
        }
        let s = self.resolved_spacing(grid);
        let size = |n: usize, sp: f64| ((n as f64 * sp / s).floor() as usize).max(1);
        let z = ((nz.saturating_sub(1) as f64 * sz / s).floor() as usize).max(1);
        Grid::new((z, size(nh, sh), size(nw, sw)), [s; 3])
            .with_origin(grid.origin())
            .with_direction(grid.direction())
    }

    /// 执行重采样. 既不超采样也不需要细分时, 输出为输入的逐体素拷贝.
    pub fn execute(&self, input: &CtVolume) -> SegResult<CtVolume> {
        if input.size() == 0 {
            return Err(SegError::InvalidInput("cannot resample an empty volume".into()));
        }
        if !self.supersample {
            if let Some(t) = self.anisotropy_threshold {
                if !(t.is_finite() && t > 0.0) {
                    return Err(SegError::InvalidInput(format!("invalid anisotropy threshold {t}")));
                }
            }
            if self.subdivisions(input.grid()) == [1; 3] {
                return Ok(input.clone());
            }
            let out_grid = self.output_grid(input.grid());
            info!(
                "thick slice resampling {:?} @ {:?} mm -> {:?} @ {:?} mm",
                input.shape(),
                input.pix_dim(),
                out_grid.shape(),
                out_grid.spacing()
            );
            return resample_onto(input.data(), input.grid(), out_grid);
        }

        let s = self.resolved_spacing(input.grid());
        if !(s.is_finite() && s > 0.0) {
            return Err(SegError::InvalidInput(format!("invalid isotropic spacing {s}")));
        }

        let smoothed = if self.needs_smoothing(input.grid()) {
            debug!("anti-alias smoothing in plane with sigma {s:.3} mm");
            Some(filters::smooth_axes(input.data(), &[1, 2], s, input.pix_dim()))
        } else {
            None
        };
        let source = smoothed.as_ref().map_or_else(|| input.data(), |a| a.view());

        let out_grid = self.output_grid(input.grid());
        info!(
            "resampling {:?} @ {:?} mm -> {:?} @ {s:.3} mm",
            input.shape(),
            input.pix_dim(),
            out_grid.shape()
        );
        resample_onto(source, input.grid(), out_grid)
    }
}

/// 在 `out_grid` 的每个体素中心对 `source` 做三线性插值, 越界处填空气.
fn resample_onto(source: ArrayView3<f32>, in_grid: &Grid, out_grid: Grid) -> SegResult<CtVolume> {
    let mut out = Array3::<f32>::zeros(out_grid.shape());
    zip_for_each!(Zip::indexed(&mut out), |idx, v: &mut f32| {
        let p = out_grid.index_to_physical(idx);
        let c = in_grid.physical_to_continuous_index(p);
        *v = interpolate(source, c).unwrap_or(hu::AIR);
    });
    Volume::new(out_grid, out)
}
