//! 水平集分割: 快速行进初始化 + 测地线活动轮廓演化.
//!
//! 状态转移: `Initialized → FastMarchingComplete → Evolving → Converged | MaxIterationsReached`.
//! 两个终止状态都给出可用的水平集, 达到迭代上限只是一个状态, 不是错误.

use log::{debug, info, warn};
use ndarray::Zip;

use crate::progress::{RunContext, Stage};
use crate::{GridAttr, Idx3d, Point3, SegError, SegResult, Volume};

mod evolution;
mod fast_marching;
mod reinit;

pub use evolution::{EvolutionReport, EvolutionStatus};
pub use fast_marching::FastMarching;
pub use reinit::reinitialize;

use evolution::Evolution;

/// 水平集. 内部为负, 外部为正.
pub type LevelSetField = Volume<f32>;

/// 水平集分割参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevelSetConfig {
    /// 快速行进的停止值 (到达时间).
    pub stopping_value: f64,

    /// 初始水平集为 `到达时间 - seed_distance`.
    pub seed_distance: f64,

    /// 传播项系数.
    pub propagation_scaling: f64,

    /// 曲率项系数.
    pub curvature_scaling: f64,

    /// 对流项系数.
    pub advection_scaling: f64,

    /// 活动层 RMS 变化低于该值时视为收敛.
    pub max_rms_change: f64,

    /// 迭代上限.
    pub max_iterations: usize,

    /// 窄带半宽, 以最小分辨率为单位.
    pub band_width: f64,

    /// 每隔多少次迭代重新初始化一次.
    pub reinit_interval: usize,

    /// CFL 数.
    pub cfl: f64,
}

impl Default for LevelSetConfig {
    fn default() -> Self {
        Self {
            stopping_value: 5.0,
            seed_distance: 0.5,
            propagation_scaling: 500.0,
            curvature_scaling: 1.0,
            advection_scaling: 0.0,
            max_rms_change: 0.0002,
            max_iterations: 300,
            band_width: 5.0,
            reinit_interval: 4,
            cfl: 0.5,
        }
    }
}

/// 种子点集合 (物理坐标), 非空.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeedSet {
    points: Vec<Point3>,
}

impl SeedSet {
    /// 创建种子集合. 空集合返回 `InvalidInput`.
    pub fn new(points: Vec<Point3>) -> SegResult<Self> {
        if points.is_empty() {
            return Err(SegError::InvalidInput("seed set is empty".to_string()));
        }
        Ok(Self { points })
    }

    /// 所有种子点.
    #[inline]
    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    /// 种子个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// 永远为 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 种子在 `grid` 中最近的体素. 落在网格外的种子被丢弃.
    pub fn to_indices<G: GridAttr>(&self, grid: &G) -> Vec<Idx3d> {
        self.points
            .iter()
            .filter_map(|&p| {
                let idx = grid.grid().physical_to_valid_index(p);
                if idx.is_none() {
                    warn!("seed {p:?} lies outside the region of interest, ignored");
                }
                idx
            })
            .collect()
    }
}

/// 模块状态.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModuleState {
    /// 尚未运行, 或上一次运行失败.
    Initialized,

    /// 快速行进完成.
    FastMarchingComplete,

    /// 演化中.
    Evolving,

    /// 收敛.
    Converged,

    /// 达到迭代上限.
    MaxIterationsReached,
}

impl ModuleState {
    /// 是否为终止状态.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::MaxIterationsReached)
    }
}

impl From<EvolutionStatus> for ModuleState {
    fn from(status: EvolutionStatus) -> Self {
        match status {
            EvolutionStatus::Converged => Self::Converged,
            EvolutionStatus::MaxIterationsReached => Self::MaxIterationsReached,
        }
    }
}

/// 水平集分割模块.
#[derive(Debug, Clone)]
pub struct LevelSetSegmentationModule {
    config: LevelSetConfig,
    state: ModuleState,
}

impl Default for LevelSetSegmentationModule {
    fn default() -> Self {
        Self::new(LevelSetConfig::default())
    }
}

impl LevelSetSegmentationModule {
    /// 以给定参数创建.
    pub fn new(config: LevelSetConfig) -> Self {
        Self {
            config,
            state: ModuleState::Initialized,
        }
    }

    /// 参数.
    #[inline]
    pub fn config(&self) -> &LevelSetConfig {
        &self.config
    }

    /// 当前状态.
    #[inline]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// 以 `speed` 为速度函数, 从 `seeds` 出发分割.
    ///
    /// 快速行进结束后和每次演化迭代前检查中止标志. 中止时返回 `SegError::Cancelled`,
    /// 不输出任何水平集, 状态停留在中止时所处的阶段. 其它错误使状态回到 `Initialized`.
    pub fn run(
        &mut self,
        speed: &Volume<f32>,
        seeds: &SeedSet,
        ctx: &mut RunContext,
    ) -> SegResult<(LevelSetField, EvolutionReport)> {
        self.state = ModuleState::Initialized;
        let result = self.run_stages(speed, seeds, ctx);
        if matches!(&result, Err(e) if !e.is_cancelled()) {
            self.state = ModuleState::Initialized;
        }
        result
    }

    fn run_stages(
        &mut self,
        speed: &Volume<f32>,
        seeds: &SeedSet,
        ctx: &mut RunContext,
    ) -> SegResult<(LevelSetField, EvolutionReport)> {
        let cfg = &self.config;
        if speed.size() == 0 {
            return Err(SegError::InvalidInput("speed function has no voxels".to_string()));
        }
        let trial = seeds.to_indices(speed);
        if trial.is_empty() {
            return Err(SegError::InvalidInput(
                "no seed lies inside the region of interest".to_string(),
            ));
        }

        let spacing = speed.pix_dim();
        let band = cfg.band_width * speed.min_spacing();
        info!("fast marching from {} seed(s)", trial.len());
        let times = FastMarching::new(speed.shape(), spacing)
            .with_speed(speed.data())
            .with_stopping_value(cfg.stopping_value)
            .run(trial.into_iter().map(|idx| (idx, 0.0)));

        let stop = cfg.stopping_value;
        let offset = cfg.seed_distance;
        let mut phi = times.mapv(|t| (t.min(stop) - offset) as f32);
        reinitialize(&mut phi, spacing, band);
        let inside = Zip::from(&phi).fold(0_usize, |n, &v| n + usize::from(v < 0.0));
        debug!("initial level set has {inside} inside voxels");

        self.state = ModuleState::FastMarchingComplete;
        ctx.report(Stage::FastMarching, 1.0);
        ctx.check_abort()?;

        self.state = ModuleState::Evolving;
        let report = Evolution::new(speed.data(), spacing, cfg).run(&mut phi, ctx)?;
        match report.status {
            EvolutionStatus::Converged => info!(
                "level set converged after {} iterations (rms {:.3e})",
                report.iterations, report.rms_change
            ),
            EvolutionStatus::MaxIterationsReached => warn!(
                "level set stopped at the iteration cap {} (rms {:.3e})",
                report.iterations, report.rms_change
            ),
        }
        self.state = report.status.into();

        Ok((speed.with_data(phi)?, report))
    }
}
