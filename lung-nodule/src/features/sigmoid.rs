use super::{FeatureGenerator, FeatureMap};
use crate::consts::hu;
use crate::{CtVolume, SegResult};

/// `1 / (1 + exp(-(x - beta) / alpha))`. `alpha` 为负时函数单调递减.
#[inline]
pub fn sigmoid(x: f64, alpha: f64, beta: f64) -> f64 {
    1.0 / (1.0 + (-(x - beta) / alpha).exp())
}

/// 强度 sigmoid 参数.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SigmoidConfig {
    /// 陡峭程度, HU.
    pub alpha: f64,

    /// 中心, HU.
    pub beta: f64,
}

impl Default for SigmoidConfig {
    /// 实性结节.
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: hu::SOLID_SIGMOID_BETA,
        }
    }
}

/// 强度 sigmoid 特征: 高于 `beta` 的体素趋于 1, 低于的趋于 0.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SigmoidFeature {
    config: SigmoidConfig,
}

impl SigmoidFeature {
    /// 以给定参数创建.
    pub fn new(config: SigmoidConfig) -> Self {
        Self { config }
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> SigmoidConfig {
        self.config
    }
}

impl FeatureGenerator for SigmoidFeature {
    fn name(&self) -> &'static str {
        "sigmoid"
    }

    fn generate(&self, input: &CtVolume) -> SegResult<FeatureMap> {
        let SigmoidConfig { alpha, beta } = self.config;
        let map = input.map(|&v| sigmoid(f64::from(v), alpha, beta) as f32);
        Ok(FeatureMap::new(self.name(), map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Grid, Volume};
    use ndarray::Array3;

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(-200.0, 1.0, -200.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(50.0, 1.0, -200.0) > 0.999_999);
        assert!(sigmoid(-1000.0, 1.0, -200.0) < 1e-12);
        // alpha 为负时递减.
        assert!(sigmoid(0.0, -10.0, 40.0) > sigmoid(80.0, -10.0, 40.0));
    }

    #[test]
    fn test_part_solid_beta() {
        let data = Array3::from_shape_vec((1, 1, 3), vec![-1000.0, -350.0, 60.0]).unwrap();
        let vol = Volume::new(Grid::new((1, 1, 3), [1.0; 3]), data).unwrap();

        let solid = SigmoidFeature::default().generate(&vol).unwrap();
        let part_solid = SigmoidFeature::new(SigmoidConfig {
            alpha: 1.0,
            beta: hu::PART_SOLID_SIGMOID_BETA,
        })
        .generate(&vol)
        .unwrap();

        // -350 HU 的磨玻璃成分只在亚实性模式下被纳入.
        assert!(solid.data()[(0, 0, 1)] < 0.01);
        assert!(part_solid.data()[(0, 0, 1)] > 0.99);
        assert!(solid.range().unwrap().0 >= 0.0 && solid.range().unwrap().1 <= 1.0);
    }
}
