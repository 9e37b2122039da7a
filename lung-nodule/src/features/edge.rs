//! Canny 边缘特征.
//!
//! 高斯平滑后求梯度, 沿梯度方向做非极大值抑制, 再用双阈值滞后连接.
//! 边缘体素取 0, 其余取 1, 水平集在边缘处停止.

use std::collections::VecDeque;

use itertools::iproduct;
use log::debug;
use ndarray::{Array3, Zip};

use super::{FeatureGenerator, FeatureMap};
use crate::filters::{gradient, smooth_isotropic};
use crate::{CtVolume, GridAttr, Idx3d, SegError, SegResult};

/// 边缘特征参数.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeConfig {
    /// 梯度前的高斯尺度, 毫米. `None` 时取图像最大分辨率.
    pub sigma: Option<f64>,

    /// 滞后连接的低阈值, 梯度模长 HU/mm.
    pub lower_threshold: f64,

    /// 滞后连接的高阈值, 梯度模长 HU/mm. 边缘必须与至少一个不低于该值的体素连通.
    pub upper_threshold: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            sigma: None,
            lower_threshold: 75.0,
            upper_threshold: 150.0,
        }
    }
}

/// 把 `idx` 沿 `offset` 移动一步, 越界时返回 `None`.
#[inline]
fn offset_index((z, h, w): Idx3d, offset: [isize; 3], (nz, nh, nw): Idx3d) -> Option<Idx3d> {
    let mv = |i: usize, d: isize, n: usize| {
        let j = i as isize + d;
        (0..n as isize).contains(&j).then_some(j as usize)
    };
    Some((mv(z, offset[0], nz)?, mv(h, offset[1], nh)?, mv(w, offset[2], nw)?))
}

const TAN_22_5_DEG: f64 = 0.414_213_562_37;

/// 把体素坐标下的梯度方向量化为 26 邻域中最接近的一步.
/// 相对最大分量不超过 tan(22.5 deg) 的分量舍去.
fn quantize_direction(g: [f64; 3]) -> Option<[isize; 3]> {
    let m = g.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if m <= 0.0 {
        return None;
    }
    Some(g.map(|v| {
        let r = v / m;
        if r > TAN_22_5_DEG {
            1
        } else if r < -TAN_22_5_DEG {
            -1
        } else {
            0
        }
    }))
}

/// Canny 边缘特征. 边缘体素为 0, 其余为 1.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EdgeFeature {
    config: EdgeConfig,
}

impl EdgeFeature {
    /// 以给定参数创建.
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> EdgeConfig {
        self.config
    }

    /// 边缘掩膜: 是边缘的体素为 `true`.
    pub fn edges(&self, input: &CtVolume) -> SegResult<Array3<bool>> {
        let cfg = self.config;
        if cfg.lower_threshold > cfg.upper_threshold {
            return Err(SegError::InvalidInput(format!(
                "canny: lower threshold {} exceeds upper threshold {}",
                cfg.lower_threshold, cfg.upper_threshold
            )));
        }
        let spacing = input.pix_dim();
        let sigma = cfg.sigma.unwrap_or_else(|| input.max_spacing());
        let smoothed = smooth_isotropic(input.data(), sigma, spacing);
        let [gz, gh, gw] = gradient(smoothed.view(), spacing);
        let mut mag = Array3::<f32>::zeros(smoothed.raw_dim());
        zip_for_each!(
            Zip::from(&mut mag).and(&gz).and(&gh).and(&gw),
            |m: &mut f32, &a: &f32, &b: &f32, &c: &f32| *m = (a * a + b * b + c * c).sqrt()
        );
        let shape = mag.dim();

        // 非极大值抑制. 平台上只保留梯度方向上的第一个体素.
        let lower = cfg.lower_threshold as f32;
        let mut candidate = Array3::from_elem(shape, false);
        let mag_ref = &mag;
        zip_for_each!(Zip::indexed(&mut candidate), |idx, c: &mut bool| {
            let m = mag_ref[idx];
            if m < lower || m <= 0.0 {
                return;
            }
            // 体素坐标下的方向.
            let g = [
                f64::from(gz[idx]) * spacing[0],
                f64::from(gh[idx]) * spacing[1],
                f64::from(gw[idx]) * spacing[2],
            ];
            let Some(dir) = quantize_direction(g) else {
                return;
            };
            let at = |o: [isize; 3]| offset_index(idx, o, shape).map_or(0.0, |i| mag_ref[i]);
            *c = m >= at(dir) && m > at(dir.map(|d| -d));
        });

        // 滞后连接.
        let upper = cfg.upper_threshold as f32;
        let mut edge = Array3::from_elem(shape, false);
        let mut queue: VecDeque<Idx3d> = Zip::indexed(&candidate)
            .and(&mag)
            .fold(VecDeque::new(), |mut q, idx, &c, &m| {
                if c && m >= upper {
                    q.push_back(idx);
                }
                q
            });
        for &idx in &queue {
            edge[idx] = true;
        }
        while let Some(idx) = queue.pop_front() {
            for (dz, dh, dw) in iproduct!(-1..=1_isize, -1..=1_isize, -1..=1_isize) {
                let Some(nb) = offset_index(idx, [dz, dh, dw], shape) else {
                    continue;
                };
                if candidate[nb] && !edge[nb] {
                    edge[nb] = true;
                    queue.push_back(nb);
                }
            }
        }
        debug!(
            "canny: sigma {sigma:.3} mm, {} edge voxels",
            edge.iter().filter(|&&e| e).count()
        );
        Ok(edge)
    }
}

impl FeatureGenerator for EdgeFeature {
    fn name(&self) -> &'static str {
        "edge"
    }

    fn generate(&self, input: &CtVolume) -> SegResult<FeatureMap> {
        let edges = self.edges(input)?;
        let out = edges.mapv(|e| if e { 0.0_f32 } else { 1.0 });
        Ok(FeatureMap::new(self.name(), input.with_data(out)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Grid, Volume};

    fn step_volume() -> CtVolume {
        let shape = (8, 8, 20);
        let data = Array3::from_shape_fn(shape, |(_, _, w)| if w < 10 { -900.0 } else { 40.0 });
        Volume::new(Grid::new(shape, [1.0; 3]), data).unwrap()
    }

    #[test]
    fn test_step_edge_is_thin() {
        let map = EdgeFeature::default().generate(&step_volume()).unwrap();
        assert_eq!(map.name(), "edge");
        // 每条沿 w 的线上恰有一个边缘体素, 位于台阶处.
        for (z, h) in iproduct!(0..8, 0..8) {
            let line: Vec<usize> = (0..20).filter(|&w| map.data()[(z, h, w)] == 0.0).collect();
            assert_eq!(line.len(), 1, "{:?}", (z, h));
            assert!((9..=10).contains(&line[0]));
        }
        assert_eq!(map.data()[(4, 4, 2)], 1.0);
        assert_eq!(map.data()[(4, 4, 17)], 1.0);
    }

    #[test]
    fn test_hysteresis() {
        // 台阶太低时没有强边缘, 全部为 1.
        let shape = (6, 6, 16);
        let data = Array3::from_shape_fn(shape, |(_, _, w)| if w < 8 { 0.0 } else { 100.0 });
        let vol = Volume::new(Grid::new(shape, [1.0; 3]), data).unwrap();
        let map = EdgeFeature::default().generate(&vol).unwrap();
        assert!(map.data().iter().all(|&v| v == 1.0));

        // 降低高阈值后出现边缘.
        let cfg = EdgeConfig {
            lower_threshold: 10.0,
            upper_threshold: 20.0,
            ..EdgeConfig::default()
        };
        let map = EdgeFeature::new(cfg).generate(&vol).unwrap();
        assert!(map.data().iter().any(|&v| v == 0.0));
    }

    #[test]
    fn test_invalid_thresholds() {
        let cfg = EdgeConfig {
            lower_threshold: 200.0,
            upper_threshold: 100.0,
            ..EdgeConfig::default()
        };
        assert!(matches!(
            EdgeFeature::new(cfg).generate(&step_volume()),
            Err(SegError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_quantize_direction() {
        assert_eq!(quantize_direction([0.0, 0.0, 0.0]), None);
        assert_eq!(quantize_direction([0.0, 0.2, -3.0]), Some([0, 0, -1]));
        assert_eq!(quantize_direction([1.0, 1.0, 0.1]), Some([1, 1, 0]));
    }
}
