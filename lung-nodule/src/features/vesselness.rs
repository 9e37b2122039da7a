use log::debug;
use ndarray::{Array3, Zip};

use super::sigmoid::sigmoid;
use super::{FeatureGenerator, FeatureMap};
use crate::filters::{hessian_at, smooth_isotropic, symmetric_eigenvalues};
use crate::{CtVolume, GridAttr, SegResult};

/// Sato 管状结构响应. `e` 为升序排列的 Hessian 特征值.
///
/// 亮管状结构的两个横截面方向二阶导为较大的负值, 沿管方向接近 0.
pub fn sato_line_measure([e0, e1, e2]: [f64; 3], alpha1: f64, alpha2: f64) -> f64 {
    let lambda_c = (-e1).min(-e0);
    if lambda_c <= 0.0 {
        return 0.0;
    }
    let alpha = if e2 <= 0.0 { alpha1 } else { alpha2 };
    let r = e2 / (alpha * lambda_c);
    lambda_c * (-0.5 * r * r).exp()
}

/// 血管性特征参数.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VesselnessConfig {
    /// Hessian 尺度, 毫米. `None` 时取图像最大分辨率.
    pub sigma: Option<f64>,

    /// 沿管方向二阶导为负时的容忍度.
    pub alpha1: f64,

    /// 沿管方向二阶导为正时的容忍度.
    pub alpha2: f64,

    /// 后接 sigmoid 的 alpha. 为负, 使管状结构得到低速度.
    pub sigmoid_alpha: f64,

    /// 后接 sigmoid 的 beta.
    pub sigmoid_beta: f64,
}

impl Default for VesselnessConfig {
    fn default() -> Self {
        Self {
            sigma: None,
            alpha1: 0.1,
            alpha2: 2.0,
            sigmoid_alpha: -10.0,
            sigmoid_beta: 40.0,
        }
    }
}

/// 血管性特征. 管状结构 (血管) 取值接近 0, 其余接近 1.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VesselnessFeature {
    config: VesselnessConfig,
}

impl VesselnessFeature {
    /// 以给定参数创建.
    pub fn new(config: VesselnessConfig) -> Self {
        Self { config }
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> VesselnessConfig {
        self.config
    }
}

impl FeatureGenerator for VesselnessFeature {
    fn name(&self) -> &'static str {
        "vesselness"
    }

    fn generate(&self, input: &CtVolume) -> SegResult<FeatureMap> {
        let cfg = self.config;
        let spacing = input.pix_dim();
        let sigma = cfg.sigma.unwrap_or_else(|| input.max_spacing());
        debug!("vesselness: sigma {sigma:.3} mm");

        let smoothed = smooth_isotropic(input.data(), sigma, spacing);
        let smoothed = smoothed.view();
        let mut out = Array3::<f32>::zeros(smoothed.raw_dim());
        zip_for_each!(Zip::indexed(&mut out), |idx, v: &mut f32| {
            let eig = symmetric_eigenvalues(hessian_at(smoothed, idx, spacing));
            let line = sato_line_measure(eig, cfg.alpha1, cfg.alpha2);
            *v = sigmoid(line, cfg.sigmoid_alpha, cfg.sigmoid_beta) as f32;
        });
        Ok(FeatureMap::new(self.name(), input.with_data(out)?))
    }
}
