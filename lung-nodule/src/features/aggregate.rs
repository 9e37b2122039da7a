use ndarray::Zip;

use super::{FeatureGenerator, FeatureMap, Generator};
use crate::{CtVolume, GridAttr, SegError, SegResult};

/// 聚合结果 (速度函数) 的名称.
const SPEED_NAME: &str = "speed";

/// 把 `map` 逐点取最小值合并进 `acc`. 二者须在同一网格上.
fn merge_min(acc: &mut FeatureMap, map: &FeatureMap) -> SegResult<()> {
    acc.grid().ensure_same_lattice(map.grid())?;
    let src = map.data();
    let mut dst = acc.map.data_mut();
    zip_for_each!(Zip::from(&mut dst).and(&src), |a: &mut f32, &b: &f32| {
        *a = a.min(b)
    });
    Ok(())
}

/// 多张特征图逐点取最小值. 至少需要一张特征图, 且所有特征图须在同一网格上.
pub fn minimum<'a, I>(maps: I) -> SegResult<FeatureMap>
where
    I: IntoIterator<Item = &'a FeatureMap>,
{
    let mut iter = maps.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| SegError::InvalidInput("no feature map to aggregate".into()))?;
    let mut acc = FeatureMap::new(SPEED_NAME, first.as_volume().clone());
    for map in iter {
        merge_min(&mut acc, map)?;
    }
    Ok(acc)
}

/// 依次运行一组特征生成器, 并把结果逐点取最小值.
///
/// 每张特征图生成后立即合并, 不会同时保留所有特征图.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimumAggregator<G = Generator> {
    generators: Vec<G>,
}

impl<G> Default for MinimumAggregator<G> {
    fn default() -> Self {
        Self {
            generators: Vec::new(),
        }
    }
}

impl<G: FeatureGenerator> MinimumAggregator<G> {
    /// 以给定生成器创建.
    pub fn new(generators: Vec<G>) -> Self {
        Self { generators }
    }

    /// 追加一个生成器.
    pub fn push(&mut self, generator: G) {
        self.generators.push(generator);
    }

    /// 所有生成器.
    #[inline]
    pub fn generators(&self) -> &[G] {
        &self.generators
    }

    /// 运行所有生成器并聚合. 每张特征图生成后先交给 `inspect` (第一个参数为序号);
    /// `inspect` 返回错误时立即停止.
    pub fn generate_each<F>(&self, input: &CtVolume, mut inspect: F) -> SegResult<FeatureMap>
    where
        F: FnMut(usize, &FeatureMap) -> SegResult<()>,
    {
        let mut acc: Option<FeatureMap> = None;
        for (i, generator) in self.generators.iter().enumerate() {
            let map = generator.generate(input)?;
            inspect(i, &map)?;
            acc = Some(match acc.take() {
                None => FeatureMap::new(SPEED_NAME, map.into_volume()),
                Some(mut acc) => {
                    merge_min(&mut acc, &map)?;
                    acc
                }
            });
        }
        acc.ok_or_else(|| SegError::InvalidInput("no feature generator configured".into()))
    }
}

impl<G: FeatureGenerator> FeatureGenerator for MinimumAggregator<G> {
    fn name(&self) -> &'static str {
        SPEED_NAME
    }

    fn generate(&self, input: &CtVolume) -> SegResult<FeatureMap> {
        self.generate_each(input, |_, _| Ok(()))
    }
}
