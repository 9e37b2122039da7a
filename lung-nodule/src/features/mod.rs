//! 特征生成器.
//!
//! 每个生成器从 (裁剪, 重采样后的) CT 体数据计算一张与之同网格的特征图,
//! 取值在 `[0, 1]` 之间, 越大表示该体素越可能属于结节. 所有特征图随后逐点取最小值,
//! 得到水平集演化的速度函数.

use std::path::Path;

use ndarray::ArrayView3;

use crate::{CtVolume, Grid, GridAttr, SegResult, Volume};

mod aggregate;
mod edge;
mod lung_wall;
mod sigmoid;
mod vesselness;

pub use aggregate::{minimum, MinimumAggregator};
pub use edge::{EdgeConfig, EdgeFeature};
pub use lung_wall::{LungWallConfig, LungWallFeature};
pub use sigmoid::{sigmoid, SigmoidConfig, SigmoidFeature};
pub use vesselness::{sato_line_measure, VesselnessConfig, VesselnessFeature};

/// 特征图. 生成后不再修改.
#[derive(Debug, Clone)]
pub struct FeatureMap {
    name: &'static str,
    map: Volume<f32>,
}

impl GridAttr for FeatureMap {
    #[inline]
    fn grid(&self) -> &Grid {
        self.map.grid()
    }
}

impl FeatureMap {
    /// 创建特征图.
    #[inline]
    pub fn new(name: &'static str, map: Volume<f32>) -> Self {
        Self { name, map }
    }

    /// 生成该特征图的生成器名称.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 数据视图.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.map.data()
    }

    /// 以体数据形式借出.
    #[inline]
    pub fn as_volume(&self) -> &Volume<f32> {
        &self.map
    }

    /// 取出体数据.
    #[inline]
    pub fn into_volume(self) -> Volume<f32> {
        self.map
    }

    /// 最小值和最大值. 空特征图返回 `None`.
    pub fn range(&self) -> Option<(f32, f32)> {
        self.map.data().iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// 以 `.npy` 格式写入 `dir/<name>.npy`.
    pub fn write_npy<P: AsRef<Path>>(&self, dir: P) -> SegResult<()> {
        let path = dir.as_ref().join(format!("{}.npy", self.name));
        ndarray_npy::write_npy(&path, &self.map.data())?;
        log::debug!("wrote feature {}", path.display());
        Ok(())
    }
}

/// 由 CT 体数据产生一张特征图.
pub trait FeatureGenerator {
    /// 生成器名称. 也用作特征图名称.
    fn name(&self) -> &'static str;

    /// 在 `input` 的网格上计算特征图.
    fn generate(&self, input: &CtVolume) -> SegResult<FeatureMap>;
}

/// 所有内置特征生成器.
#[derive(Debug, Clone, PartialEq)]
pub enum Generator {
    /// 肺壁.
    LungWall(LungWallFeature),

    /// 血管性 (抑制管状结构).
    Vesselness(VesselnessFeature),

    /// 强度 sigmoid.
    Sigmoid(SigmoidFeature),

    /// 边缘.
    Edge(EdgeFeature),
}

impl FeatureGenerator for Generator {
    fn name(&self) -> &'static str {
        match self {
            Self::LungWall(g) => g.name(),
            Self::Vesselness(g) => g.name(),
            Self::Sigmoid(g) => g.name(),
            Self::Edge(g) => g.name(),
        }
    }

    fn generate(&self, input: &CtVolume) -> SegResult<FeatureMap> {
        match self {
            Self::LungWall(g) => g.generate(input),
            Self::Vesselness(g) => g.generate(input),
            Self::Sigmoid(g) => g.generate(input),
            Self::Edge(g) => g.generate(input),
        }
    }
}

impl From<LungWallFeature> for Generator {
    fn from(g: LungWallFeature) -> Self {
        Self::LungWall(g)
    }
}

impl From<VesselnessFeature> for Generator {
    fn from(g: VesselnessFeature) -> Self {
        Self::Vesselness(g)
    }
}

impl From<SigmoidFeature> for Generator {
    fn from(g: SigmoidFeature) -> Self {
        Self::Sigmoid(g)
    }
}

impl From<EdgeFeature> for Generator {
    fn from(g: EdgeFeature) -> Self {
        Self::Edge(g)
    }
}
