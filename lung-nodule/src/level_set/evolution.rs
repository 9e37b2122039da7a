//! 测地线活动轮廓 (geodesic active contour) 演化.
//!
//! `phi_t = -P g |grad phi| + C g kappa |grad phi| - a A . grad phi`, 其中 `g` 为速度函数,
//! `A = -grad g`, `kappa` 为平均曲率. 传播项和对流项使用迎风差分, 曲率项使用中心差分.
//! 只在窄带内更新, 并定期重新初始化.

use log::debug;
use ndarray::{Array3, ArrayView3, Zip};

use super::reinit::reinitialize;
use super::LevelSetConfig;
use crate::filters::{clamped_step, gradient};
use crate::progress::{RunContext, Stage};
use crate::{Idx3d, SegResult};

/// 演化的终止原因.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvolutionStatus {
    /// 活动层 (零等值面两侧的体素) 的 RMS 变化低于阈值.
    Converged,

    /// 达到迭代上限. 结果仍然可用.
    MaxIterationsReached,
}

/// 演化统计.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EvolutionReport {
    /// 执行的迭代次数.
    pub iterations: usize,

    /// 最后一次迭代的 RMS 变化 (以最小分辨率为单位).
    pub rms_change: f64,

    /// 终止原因.
    pub status: EvolutionStatus,
}

/// `idx` 是否有符号相反的 6 邻居, 即紧挨零等值面.
fn on_interface(phi: ArrayView3<f32>, idx: Idx3d) -> bool {
    let (nz, nh, nw) = phi.dim();
    let n = [nz, nh, nw];
    let inside = phi[idx] < 0.0;
    (0..3).any(|axis| {
        [-1, 1].into_iter().any(|delta| {
            let nb = clamped_step(idx, axis, delta, n[axis]);
            (phi[nb] < 0.0) != inside
        })
    })
}

/// 一次演化所需的静态数据.
pub(crate) struct Evolution<'a> {
    speed: ArrayView3<'a, f32>,
    /// `-grad g`, 仅在对流项系数非零时计算.
    advection: Option<[Array3<f32>; 3]>,
    spacing: [f64; 3],
    config: &'a LevelSetConfig,
}

impl<'a> Evolution<'a> {
    pub(crate) fn new(speed: ArrayView3<'a, f32>, spacing: [f64; 3], config: &'a LevelSetConfig) -> Self {
        let advection = (config.advection_scaling != 0.0).then(|| {
            gradient(speed, spacing).map(|mut g| {
                g.mapv_inplace(|v| -v);
                g
            })
        });
        Self {
            speed,
            advection,
            spacing,
            config,
        }
    }

    /// 最小分辨率.
    fn h_min(&self) -> f64 {
        self.spacing.into_iter().fold(f64::MAX, f64::min)
    }

    /// 单个体素的 `phi_t`.
    fn rate_at(&self, phi: ArrayView3<f32>, idx: Idx3d) -> f64 {
        let cfg = self.config;
        let (nz, nh, nw) = phi.dim();
        let n = [nz, nh, nw];
        let f = |i: Idx3d| f64::from(phi[i]);
        let c = f(idx);
        let g = f64::from(self.speed[idx]);

        let mut d_minus = [0.0; 3];
        let mut d_plus = [0.0; 3];
        let mut d_center = [0.0; 3];
        let mut d_second = [0.0; 3];
        for axis in 0..3 {
            let h = self.spacing[axis];
            let m = f(clamped_step(idx, axis, -1, n[axis]));
            let p = f(clamped_step(idx, axis, 1, n[axis]));
            d_minus[axis] = (c - m) / h;
            d_plus[axis] = (p - c) / h;
            d_center[axis] = (p - m) / (2.0 * h);
            d_second[axis] = (p - 2.0 * c + m) / (h * h);
        }

        let mut rate = 0.0;

        let prop = cfg.propagation_scaling * g;
        if prop != 0.0 {
            let grad = (0..3)
                .map(|a| {
                    let (dm, dp) = (d_minus[a], d_plus[a]);
                    if prop > 0.0 {
                        dm.max(0.0).powi(2) + dp.min(0.0).powi(2)
                    } else {
                        dm.min(0.0).powi(2) + dp.max(0.0).powi(2)
                    }
                })
                .sum::<f64>()
                .sqrt();
            rate -= prop * grad;
        }

        let curv = cfg.curvature_scaling * g;
        let grad_sq: f64 = d_center.iter().map(|d| d * d).sum();
        if curv != 0.0 && grad_sq > 1e-12 {
            let mixed = |a: usize, b: usize| {
                let step = |da, db| clamped_step(clamped_step(idx, a, da, n[a]), b, db, n[b]);
                (f(step(1, 1)) - f(step(1, -1)) - f(step(-1, 1)) + f(step(-1, -1)))
                    / (4.0 * self.spacing[a] * self.spacing[b])
            };
            let mut num = 0.0;
            for a in 0..3 {
                num += d_second[a] * (grad_sq - d_center[a] * d_center[a]);
            }
            for (a, b) in [(0, 1), (0, 2), (1, 2)] {
                num -= 2.0 * d_center[a] * d_center[b] * mixed(a, b);
            }
            // kappa * |grad phi|.
            rate += curv * num / grad_sq;
        }

        if let Some(field) = &self.advection {
            let scale = cfg.advection_scaling;
            for (a, comp) in field.iter().enumerate() {
                let v = scale * f64::from(comp[idx]);
                rate -= v * if v > 0.0 { d_minus[a] } else { d_plus[a] };
            }
        }
        rate
    }

    /// 单个体素允许的最大前沿速度 (用于 CFL 条件).
    fn local_speed(&self, idx: Idx3d) -> f64 {
        let cfg = self.config;
        let g = f64::from(self.speed[idx]);
        let adv = self.advection.as_ref().map_or(0.0, |field| {
            field.iter().map(|c| f64::from(c[idx]).abs()).sum::<f64>() * cfg.advection_scaling.abs()
        });
        (cfg.propagation_scaling * g).abs() + adv
    }

    /// 在 `phi` 上演化直到收敛或达到迭代上限. `phi` 须已是窄带内的带符号距离.
    pub(crate) fn run(&self, phi: &mut Array3<f32>, ctx: &mut RunContext) -> SegResult<EvolutionReport> {
        let cfg = self.config;
        let h = self.h_min();
        let band = cfg.band_width * h;
        let active = 0.5 * h;
        let g_max = self.speed.iter().fold(0.0_f64, |m, &g| m.max(f64::from(g)));
        let dt_curvature = if cfg.curvature_scaling != 0.0 && g_max > 0.0 {
            cfg.cfl * h * h / (6.0 * cfg.curvature_scaling.abs() * g_max)
        } else {
            f64::INFINITY
        };

        let mut rates = Array3::<f32>::zeros(phi.raw_dim());
        let mut rms = 0.0;
        for it in 1..=cfg.max_iterations {
            ctx.check_abort()?;

            let max_speed = Zip::indexed(&*phi).fold(0.0_f64, |m, idx, &p| {
                if f64::from(p).abs() < band {
                    m.max(self.local_speed(idx))
                } else {
                    m
                }
            });
            let dt_front = if max_speed > 0.0 {
                cfg.cfl * h / max_speed
            } else {
                f64::INFINITY
            };
            let dt = dt_front.min(dt_curvature);
            if !dt.is_finite() {
                debug!("level set: nothing can move, stopping at iteration {it}");
                return Ok(EvolutionReport {
                    iterations: it,
                    rms_change: 0.0,
                    status: EvolutionStatus::Converged,
                });
            }

            let view = phi.view();
            zip_for_each!(Zip::indexed(&mut rates), |idx, r: &mut f32| {
                *r = if f64::from(view[idx]).abs() < band {
                    self.rate_at(view, idx) as f32
                } else {
                    0.0
                };
            });

            let (sum_sq, count) =
                Zip::indexed(&*phi)
                    .and(&rates)
                    .fold((0.0_f64, 0_usize), |(s, c), idx, &p, &r| {
                        if f64::from(p).abs() <= active || on_interface(view, idx) {
                            let change = dt * f64::from(r) / h;
                            (s + change * change, c + 1)
                        } else {
                            (s, c)
                        }
                    });
            rms = if count > 0 {
                (sum_sq / count as f64).sqrt()
            } else {
                0.0
            };

            let dt32 = dt as f32;
            zip_for_each!(Zip::from(&mut *phi).and(&rates), |p: &mut f32, &r: &f32| {
                *p += dt32 * r
            });

            if it % cfg.reinit_interval.max(1) == 0 {
                reinitialize(phi, self.spacing, band);
            }
            ctx.report(Stage::Evolution, it as f64 / cfg.max_iterations as f64);

            if rms < cfg.max_rms_change {
                debug!("level set converged after {it} iterations (rms {rms:.3e})");
                reinitialize(phi, self.spacing, band);
                return Ok(EvolutionReport {
                    iterations: it,
                    rms_change: rms,
                    status: EvolutionStatus::Converged,
                });
            }
        }

        reinitialize(phi, self.spacing, band);
        Ok(EvolutionReport {
            iterations: cfg.max_iterations,
            rms_change: rms,
            status: EvolutionStatus::MaxIterationsReached,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere_phi(n: usize, center: f64, radius: f64) -> Array3<f32> {
        Array3::from_shape_fn((n, n, n), |(z, h, w)| {
            let d = ((z as f64 - center).powi(2) + (h as f64 - center).powi(2) + (w as f64 - center).powi(2)).sqrt();
            (d - radius) as f32
        })
    }

    #[test]
    fn test_propagation_expands() {
        let config = LevelSetConfig {
            propagation_scaling: 1.0,
            curvature_scaling: 0.0,
            max_iterations: 4,
            max_rms_change: 0.0,
            ..LevelSetConfig::default()
        };
        let speed = Array3::from_elem((21, 21, 21), 1.0_f32);
        let mut phi = sphere_phi(21, 10.0, 4.0);
        let evo = Evolution::new(speed.view(), [1.0; 3], &config);
        let report = evo.run(&mut phi, &mut RunContext::silent()).unwrap();
        assert_eq!(report.status, EvolutionStatus::MaxIterationsReached);
        assert_eq!(report.iterations, 4);
        // 4 次迭代, 每次前进 0.5 个体素.
        assert!(phi[(10, 10, 15)] < 0.0);
        assert!(phi[(10, 10, 17)] > 0.0);
    }

    #[test]
    fn test_curvature_shrinks() {
        let config = LevelSetConfig {
            propagation_scaling: 0.0,
            curvature_scaling: 1.0,
            max_iterations: 40,
            max_rms_change: 0.0,
            ..LevelSetConfig::default()
        };
        let speed = Array3::from_elem((21, 21, 21), 1.0_f32);
        let mut phi = sphere_phi(21, 10.0, 5.0);
        let before = phi[(10, 10, 14)];
        let evo = Evolution::new(speed.view(), [1.0; 3], &config);
        evo.run(&mut phi, &mut RunContext::silent()).unwrap();
        assert!(phi[(10, 10, 14)] > before);
        assert!(phi[(10, 10, 10)] < 0.0);
    }

    #[test]
    fn test_single_seed_grows_with_default_tolerance() {
        // 与快速行进初始化相同: 只有种子体素为负.
        let n = 21;
        let config = LevelSetConfig {
            max_iterations: 40,
            ..LevelSetConfig::default()
        };
        let speed = Array3::from_shape_fn((n, n, n), |(z, h, w)| {
            let d2 = [z, h, w].iter().map(|&v| (v as f64 - 10.0).powi(2)).sum::<f64>();
            if d2 <= 36.0 {
                1.0_f32
            } else {
                0.0
            }
        });
        let mut phi = sphere_phi(n, 10.0, 0.0).mapv(|d| d.min(5.0) - 0.5);
        reinitialize(&mut phi, [1.0; 3], config.band_width);
        assert_eq!(phi.iter().filter(|&&v| v < 0.0).count(), 1);

        let evo = Evolution::new(speed.view(), [1.0; 3], &config);
        let report = evo.run(&mut phi, &mut RunContext::silent()).unwrap();
        assert!(report.iterations > 1, "{report:?}");
        let inside = phi.iter().filter(|&&v| v < -0.5).count();
        let expected = speed.iter().filter(|&&g| g > 0.0).count();
        assert!(inside >= expected / 2, "{inside} vs {expected}");
        assert!(inside <= expected);
        assert!(phi[(10, 10, 18)] > 0.0);
    }

    #[test]
    fn test_on_interface() {
        let phi = sphere_phi(9, 4.0, 2.0);
        // (4, 4, 5) 在内, (4, 4, 6) 恰在零点上, 按外侧处理.
        assert!(on_interface(phi.view(), (4, 4, 5)));
        assert!(on_interface(phi.view(), (4, 4, 6)));
        assert!(!on_interface(phi.view(), (4, 4, 7)));
        assert!(!on_interface(phi.view(), (4, 4, 4)));
        assert!(!on_interface(phi.view(), (0, 0, 0)));
    }

    #[test]
    fn test_zero_speed_converges_immediately() {
        let config = LevelSetConfig::default();
        let speed = Array3::<f32>::zeros((9, 9, 9));
        let mut phi = sphere_phi(9, 4.0, 2.0);
        let evo = Evolution::new(speed.view(), [1.0; 3], &config);
        let report = evo.run(&mut phi, &mut RunContext::silent()).unwrap();
        assert_eq!(report.status, EvolutionStatus::Converged);
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn test_advection_field() {
        let config = LevelSetConfig {
            advection_scaling: 1.0,
            ..LevelSetConfig::default()
        };
        let speed = Array3::from_shape_fn((3, 3, 8), |(_, _, w)| w as f32 * 0.1);
        let evo = Evolution::new(speed.view(), [1.0; 3], &config);
        let field = evo.advection.as_ref().unwrap();
        assert!((field[2][(1, 1, 4)] + 0.1).abs() < 1e-6);
    }
}
