use log::{debug, warn};

use super::{FeatureGenerator, FeatureMap};
use crate::consts::gray::*;
use crate::consts::hu;
use crate::morph_3d::{HoleFillReport, HoleFillStatus, VotingHoleFill};
use crate::{CtVolume, GridAttr, MaskVolume, SegError, SegResult};

/// 肺壁特征参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LungWallConfig {
    /// 阈值下限 (HU). `[threshold, upper_threshold]` 之外的体素 (空气) 为前景,
    /// 之内的软组织与肺壁为背景.
    pub threshold: f32,

    /// 阈值上限 (HU).
    pub upper_threshold: f32,

    /// 空洞填充邻域半径, 毫米.
    pub radius_mm: f64,

    /// 每个方向的最小体素半径.
    pub min_radius_voxels: usize,

    /// 多数阈值.
    pub majority: usize,

    /// 空洞填充迭代上限.
    pub max_iterations: usize,
}

impl Default for LungWallConfig {
    fn default() -> Self {
        Self {
            threshold: hu::LUNG_THRESHOLD,
            upper_threshold: hu::LUNG_THRESHOLD_UPPER,
            radius_mm: 3.0,
            min_radius_voxels: 3,
            majority: VotingHoleFill::DEFAULT_MAJORITY,
            max_iterations: VotingHoleFill::DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// 肺壁特征: 阈值化 + 迭代多数投票空洞填充, 结果 0 / 1.
///
/// 空气为前景. 空洞填充把被空气包围的凸起软组织 (结节) 并入前景,
/// 平直的胸壁保持为背景, 因此肺实质与结节处为 1, 胸壁处为 0.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LungWallFeature {
    config: LungWallConfig,
}

impl LungWallFeature {
    /// 以给定参数创建.
    pub fn new(config: LungWallConfig) -> Self {
        Self { config }
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> &LungWallConfig {
        &self.config
    }

    /// 计算填充后的二值掩膜, 以及空洞填充统计.
    pub fn mask(&self, input: &CtVolume) -> SegResult<(MaskVolume, HoleFillReport)> {
        if input.size() == 0 {
            return Err(SegError::InvalidInput("lung wall: empty region".into()));
        }
        let cfg = &self.config;
        let range = cfg.threshold..=cfg.upper_threshold;
        let mut mask = input.data().map(|v| {
            if range.contains(v) {
                MASK_BACKGROUND
            } else {
                MASK_FOREGROUND
            }
        });

        let radius =
            VotingHoleFill::radius_for_spacing(cfg.radius_mm, input.pix_dim(), cfg.min_radius_voxels);
        let report = VotingHoleFill::new(radius)
            .with_majority(cfg.majority)
            .with_max_iterations(cfg.max_iterations)
            .run(&mut mask);
        debug!("lung wall hole fill: radius {radius:?}, {report:?}");
        if report.status == HoleFillStatus::IterationCapReached {
            warn!(
                "lung wall hole filling stopped at the iteration cap ({})",
                report.iterations
            );
        }
        Ok((input.with_data(mask)?, report))
    }
}

impl FeatureGenerator for LungWallFeature {
    fn name(&self) -> &'static str {
        "lung_wall"
    }

    fn generate(&self, input: &CtVolume) -> SegResult<FeatureMap> {
        let (mask, _) = self.mask(input)?;
        let map = mask.map(|&p| if is_foreground(p) { 1.0 } else { 0.0 });
        Ok(FeatureMap::new(self.name(), map))
    }
}
