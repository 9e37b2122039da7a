//! 分割流水线编排.
//!
//! 按 ROI 裁剪 → (可选) 各向同性重采样 → 特征生成 → 最小值聚合 → 水平集分割.
//! 每个阶段完整结束后才开始下一阶段, 中间结果只在一次 [`LesionSegmenter::update`] 内存活.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};

use crate::consts::hu;
use crate::features::{
    EdgeConfig, EdgeFeature, Generator, LungWallConfig, LungWallFeature,
    MinimumAggregator, SigmoidConfig, SigmoidFeature, VesselnessConfig, VesselnessFeature,
};
use crate::level_set::{
    EvolutionReport, EvolutionStatus, LevelSetConfig, LevelSetField, LevelSetSegmentationModule,
    SeedSet,
};
use crate::progress::{AbortHandle, Progress, ProgressObserver, RunContext, Stage};
use crate::resample::VolumeResampler;
use crate::{CtVolume, GeometryError, GridAttr, InputError, Point3, Region, SegError, SegResult};

/// 结节类型. 决定强度 sigmoid 的默认中心.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoduleKind {
    /// 实性结节.
    #[default]
    Solid,

    /// 亚实性 (部分实性) 结节. 磨玻璃成分也应纳入.
    PartSolid,
}

impl NoduleKind {
    /// 强度 sigmoid 的默认中心 (HU).
    pub const fn sigmoid_beta(self) -> f64 {
        match self {
            Self::Solid => hu::SOLID_SIGMOID_BETA,
            Self::PartSolid => hu::PART_SOLID_SIGMOID_BETA,
        }
    }
}

/// 流水线参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmenterConfig {
    /// 结节类型.
    pub kind: NoduleKind,

    /// 强度 sigmoid 中心. `None` 时由 `kind` 决定.
    pub sigmoid_beta: Option<f64>,

    /// 强度 sigmoid 陡峭程度.
    pub sigmoid_alpha: f64,

    /// 血管性/边缘特征的平滑尺度 (毫米). `None` 时取图像最大分辨率.
    pub sigma: Option<f64>,

    /// 是否重采样到各向同性网格.
    pub supersample: bool,

    /// 各向同性分辨率 (毫米). 0 表示自动估计.
    pub isotropic_spacing: f64,

    /// 未做各向同性重采样时, 是否细分过厚的层.
    pub resample_thick_slices: bool,

    /// 厚层细分的各向异性阈值 (相对最细分辨率的倍数).
    pub anisotropy_threshold: f64,

    /// 肺壁特征参数.
    pub lung_wall: LungWallConfig,

    /// 血管性特征参数. 其中的 `sigma` 会被上面的 `sigma` 覆盖.
    pub vesselness: VesselnessConfig,

    /// 边缘特征参数. `None` 时不使用边缘特征.
    pub edge: Option<EdgeConfig>,

    /// 水平集参数.
    pub level_set: LevelSetConfig,

    /// 若给出, 把每张特征图和速度函数以 `.npy` 写入该目录.
    pub feature_dump_dir: Option<PathBuf>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::solid()
    }
}

impl SegmenterConfig {
    /// 实性结节的默认参数.
    pub fn solid() -> Self {
        Self {
            kind: NoduleKind::Solid,
            sigmoid_beta: None,
            sigmoid_alpha: SigmoidConfig::default().alpha,
            sigma: None,
            supersample: false,
            isotropic_spacing: 0.0,
            resample_thick_slices: false,
            anisotropy_threshold: VolumeResampler::DEFAULT_ANISOTROPY_THRESHOLD,
            lung_wall: LungWallConfig::default(),
            vesselness: VesselnessConfig::default(),
            edge: None,
            level_set: LevelSetConfig::default(),
            feature_dump_dir: None,
        }
    }

    /// 亚实性结节的默认参数.
    pub fn part_solid() -> Self {
        Self {
            kind: NoduleKind::PartSolid,
            ..Self::solid()
        }
    }

    /// 实际使用的 sigmoid 中心.
    #[inline]
    pub fn resolved_sigmoid_beta(&self) -> f64 {
        self.sigmoid_beta.unwrap_or_else(|| self.kind.sigmoid_beta())
    }
}

/// 一次运行的结果.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunStatus {
    /// 演化收敛.
    Converged,

    /// 演化达到迭代上限. 输出仍然可用.
    MaxIterationsReached,

    /// 运行被中止, 没有输出.
    Cancelled,
}

impl From<EvolutionStatus> for RunStatus {
    fn from(status: EvolutionStatus) -> Self {
        match status {
            EvolutionStatus::Converged => Self::Converged,
            EvolutionStatus::MaxIterationsReached => Self::MaxIterationsReached,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => f.write_str("converged"),
            Self::MaxIterationsReached => f.write_str("maximum iterations reached"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// 记录最近一条状态信息并把进度转发给外部观察者.
struct StatusTracker<'a> {
    message: &'a mut String,
    inner: Option<&'a mut dyn ProgressObserver>,
    max_iterations: usize,
}

impl ProgressObserver for StatusTracker<'_> {
    fn on_progress(&mut self, progress: &Progress) {
        *self.message = match progress.stage {
            Stage::Evolution => {
                let it = (progress.fraction * self.max_iterations as f64).round() as usize;
                format!("{} (iteration {it})", progress.stage)
            }
            stage => stage.to_string(),
        };
        if let Some(inner) = self.inner.as_deref_mut() {
            inner.on_progress(progress);
        }
    }
}

/// 肺结节分割器.
///
/// ```no_run
/// use lung_nodule::pipeline::{LesionSegmenter, RunStatus, SegmenterConfig};
///
/// # fn run(ct: lung_nodule::CtVolume) -> lung_nodule::SegResult<()> {
/// let mut seg = LesionSegmenter::new(SegmenterConfig::solid());
/// seg.set_input(ct)?;
/// seg.set_seeds(vec![[10.0, -20.0, 35.0]])?;
/// seg.set_region_from_corners([0.0, -30.0, 25.0], [20.0, -10.0, 45.0])?;
/// if seg.update()? != RunStatus::Cancelled {
///     let phi = seg.output().unwrap();
///     println!("{:?}", phi.data().dim());
/// }
/// # Ok(())
/// # }
/// ```
pub struct LesionSegmenter {
    config: SegmenterConfig,
    input: Option<CtVolume>,
    seeds: Option<SeedSet>,
    roi: Option<Region>,
    observer: Option<Box<dyn ProgressObserver + Send>>,
    abort: AbortHandle,
    output: Option<LevelSetField>,
    report: Option<EvolutionReport>,
    status_message: String,
}

impl Default for LesionSegmenter {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}

impl LesionSegmenter {
    /// 以给定参数创建.
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            input: None,
            seeds: None,
            roi: None,
            observer: None,
            abort: AbortHandle::new(),
            output: None,
            report: None,
            status_message: String::new(),
        }
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// 可修改的参数.
    #[inline]
    pub fn config_mut(&mut self) -> &mut SegmenterConfig {
        &mut self.config
    }

    /// 设置输入图像. 方向矩阵会被归一化为单位阵.
    pub fn set_input(&mut self, input: CtVolume) -> SegResult<()> {
        let input = if input.grid().is_identity_direction() {
            input
        } else {
            debug!("reorienting input to identity direction");
            input.reorient_to_identity()?
        };
        self.input = Some(input);
        self.output = None;
        Ok(())
    }

    /// 输入图像 (已归一化方向).
    #[inline]
    pub fn input(&self) -> Option<&CtVolume> {
        self.input.as_ref()
    }

    /// 设置种子点 (物理坐标). 空集合返回 `InvalidInput`.
    pub fn set_seeds(&mut self, seeds: Vec<Point3>) -> SegResult<()> {
        self.seeds = Some(SeedSet::new(seeds)?);
        Ok(())
    }

    /// 设置 ROI. 未设置时使用整幅图像.
    pub fn set_region_of_interest(&mut self, roi: Region) {
        self.roi = Some(roi);
    }

    /// 由两个物理角点设置 ROI. 须先设置输入图像.
    pub fn set_region_from_corners(&mut self, p1: Point3, p2: Point3) -> SegResult<Region> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| SegError::InvalidInput("input image is not set".to_string()))?;
        let roi = Region::from_physical_corners(input.grid(), p1, p2)?;
        self.roi = Some(roi);
        Ok(roi)
    }

    /// 设置强度 sigmoid 中心.
    pub fn set_sigmoid_beta(&mut self, beta: f64) {
        self.config.sigmoid_beta = Some(beta);
    }

    /// 设置血管性/边缘特征的平滑尺度.
    pub fn set_sigma(&mut self, sigma: f64) {
        self.config.sigma = Some(sigma);
    }

    /// 打开各向同性重采样. `spacing` 为 0 时自动估计.
    pub fn set_isotropic_spacing(&mut self, spacing: f64) {
        self.config.supersample = true;
        self.config.isotropic_spacing = spacing;
    }

    /// 设置进度观察者.
    pub fn set_progress_observer<O: ProgressObserver + Send + 'static>(&mut self, observer: O) {
        self.observer = Some(Box::new(observer));
    }

    /// 中止标志. 可以在其它线程上调用 `abort()`.
    #[inline]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// 最近一次成功运行的输出水平集.
    #[inline]
    pub fn output(&self) -> Option<&LevelSetField> {
        self.output.as_ref()
    }

    /// 取出输出水平集.
    #[inline]
    pub fn take_output(&mut self) -> Option<LevelSetField> {
        self.output.take()
    }

    /// 最近一次成功运行的演化统计.
    #[inline]
    pub fn report(&self) -> Option<EvolutionReport> {
        self.report
    }

    /// 最近一条状态信息.
    #[inline]
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// 运行整条流水线.
    ///
    /// 中止时返回 `Ok(RunStatus::Cancelled)` 且不产生输出. 开始运行前会清除之前的中止请求.
    pub fn update(&mut self) -> SegResult<RunStatus> {
        self.output = None;
        self.report = None;
        self.abort.reset();
        match self.execute() {
            Ok((phi, report)) => {
                self.output = Some(phi);
                self.report = Some(report);
                let status = RunStatus::from(report.status);
                self.status_message = format!("segmentation {status}");
                info!("{}", self.status_message);
                Ok(status)
            }
            Err(SegError::Cancelled) => {
                warn!("segmentation cancelled");
                self.status_message = RunStatus::Cancelled.to_string();
                Ok(RunStatus::Cancelled)
            }
            Err(e) => {
                self.status_message = format!("segmentation failed: {e}");
                Err(e)
            }
        }
    }

    fn execute(&mut self) -> SegResult<(LevelSetField, EvolutionReport)> {
        let Self {
            config,
            input,
            seeds,
            roi,
            observer,
            abort,
            status_message,
            ..
        } = self;
        let input = input
            .as_ref()
            .ok_or_else(|| SegError::InvalidInput("input image is not set".to_string()))?;
        let seeds = seeds
            .as_ref()
            .ok_or_else(|| SegError::InvalidInput("seed points are not set".to_string()))?;

        let mut tracker = StatusTracker {
            message: status_message,
            inner: observer.as_deref_mut().map(|o| o as &mut dyn ProgressObserver),
            max_iterations: config.level_set.max_iterations,
        };
        let mut ctx = RunContext::new(Some(&mut tracker), abort.clone());

        // 裁剪.
        let whole = Region::whole(input.shape());
        let region = match roi {
            Some(roi) => roi.crop(&whole).ok_or_else(|| {
                GeometryError::EmptyRegion(format!("ROI {roi:?} does not overlap {whole:?}"))
            })?,
            None => whole,
        };
        let cropped = input.crop(&region)?;
        info!("cropped region {:?} -> shape {:?}", region, cropped.shape());
        ctx.report(Stage::Crop, 1.0);
        ctx.check_abort()?;

        // 重采样.
        let mut resampler = VolumeResampler::new(config.supersample, config.isotropic_spacing);
        if config.resample_thick_slices {
            resampler = resampler.with_thick_slice_resampling(config.anisotropy_threshold);
        }
        let volume = resampler.execute(&cropped)?;
        drop(cropped);
        ctx.report(Stage::Resample, 1.0);
        ctx.check_abort()?;

        // 特征.
        let sigma = config.sigma.unwrap_or_else(|| input.max_spacing());
        let aggregator = build_aggregator(config, sigma);
        if let Some(dir) = &config.feature_dump_dir {
            fs::create_dir_all(dir).map_err(|e| InputError::write_failed(dir, e))?;
        }
        let n = aggregator.generators().len();
        let dump_dir = config.feature_dump_dir.as_deref();
        let speed = aggregator.generate_each(&volume, |i, map| {
            if let Some((lo, hi)) = map.range() {
                debug!("feature {} range [{lo}, {hi}]", map.name());
            }
            if let Some(dir) = dump_dir {
                map.write_npy(dir)?;
            }
            ctx.report(Stage::Feature(map.name()), (i + 1) as f64 / n as f64);
            ctx.check_abort()
        })?;
        if let Some(dir) = dump_dir {
            speed.write_npy(dir)?;
        }
        ctx.report(Stage::Aggregate, 1.0);
        ctx.check_abort()?;

        // 水平集.
        let mut module = LevelSetSegmentationModule::new(config.level_set.clone());
        let result = module.run(speed.as_volume(), seeds, &mut ctx)?;
        ctx.report(Stage::Done, 1.0);
        Ok(result)
    }
}

/// 按参数组装特征生成器: 肺壁, 血管性, 强度 sigmoid, 以及可选的边缘.
fn build_aggregator(config: &SegmenterConfig, sigma: f64) -> MinimumAggregator<Generator> {
    let mut aggregator = MinimumAggregator::new(vec![
        LungWallFeature::new(config.lung_wall.clone()).into(),
        VesselnessFeature::new(VesselnessConfig {
            sigma: Some(sigma),
            ..config.vesselness
        })
        .into(),
        SigmoidFeature::new(SigmoidConfig {
            alpha: config.sigmoid_alpha,
            beta: config.resolved_sigmoid_beta(),
        })
        .into(),
    ]);
    if let Some(edge) = config.edge {
        aggregator.push(
            EdgeFeature::new(EdgeConfig {
                sigma: Some(edge.sigma.unwrap_or(sigma)),
                ..edge
            })
            .into(),
        );
    }
    aggregator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureGenerator;
    use crate::{Grid, Volume};

    fn air(shape: (usize, usize, usize)) -> CtVolume {
        Volume::from_elem(Grid::new(shape, [1.0; 3]), hu::AIR)
    }

    #[test]
    fn test_nodule_kind_beta() {
        assert_eq!(SegmenterConfig::solid().resolved_sigmoid_beta(), -200.0);
        assert_eq!(SegmenterConfig::part_solid().resolved_sigmoid_beta(), -500.0);
        let mut seg = LesionSegmenter::new(SegmenterConfig::part_solid());
        seg.set_sigmoid_beta(-300.0);
        assert_eq!(seg.config().resolved_sigmoid_beta(), -300.0);
    }

    #[test]
    fn test_generators() {
        let mut config = SegmenterConfig::solid();
        let names = |c: &SegmenterConfig| {
            build_aggregator(c, 1.5)
                .generators()
                .iter()
                .map(|g| g.name())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&config), vec!["lung_wall", "vesselness", "sigmoid"]);
        config.edge = Some(EdgeConfig::default());
        assert_eq!(names(&config), vec!["lung_wall", "vesselness", "sigmoid", "edge"]);
    }

    #[test]
    fn test_missing_input_or_seeds() {
        let mut seg = LesionSegmenter::default();
        assert!(matches!(seg.update(), Err(SegError::InvalidInput(_))));
        seg.set_input(air((4, 4, 4))).unwrap();
        assert!(matches!(seg.update(), Err(SegError::InvalidInput(_))));
        assert!(seg.status_message().starts_with("segmentation failed"));
        assert!(seg.set_seeds(vec![]).is_err());
    }

    #[test]
    fn test_roi_outside_image() {
        let mut seg = LesionSegmenter::default();
        seg.set_input(air((4, 4, 4))).unwrap();
        let err = seg
            .set_region_from_corners([10.0, 10.0, 10.0], [20.0, 20.0, 20.0])
            .unwrap_err();
        assert!(matches!(err, SegError::Geometry(GeometryError::EmptyRegion(_))));

        seg.set_seeds(vec![[1.0, 1.0, 1.0]]).unwrap();
        seg.set_region_of_interest(Region::new([8, 8, 8], [2, 2, 2]));
        assert!(matches!(
            seg.update(),
            Err(SegError::Geometry(GeometryError::EmptyRegion(_)))
        ));
        assert!(seg.output().is_none());
    }

    #[test]
    fn test_cancel_before_run_is_cleared() {
        let mut seg = LesionSegmenter::default();
        seg.set_input(air((6, 6, 6))).unwrap();
        seg.set_seeds(vec![[3.0, 3.0, 3.0]]).unwrap();
        let handle = seg.abort_handle();
        seg.set_progress_observer(move |p: &Progress| {
            if p.stage == Stage::Crop {
                handle.abort();
            }
        });
        assert_eq!(seg.update().unwrap(), RunStatus::Cancelled);
        assert!(seg.output().is_none());
        assert_eq!(seg.status_message(), "cancelled");
    }
}
