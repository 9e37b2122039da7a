#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 对 CT 扫描中的肺结节进行基于水平集的三维分割, 并测量结节体积.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 流水线
//!
//! 原始体数据 → 按 ROI 裁剪 → (可选) 各向同性重采样 → 各特征生成器
//! (肺壁, 血管性, 强度 sigmoid, 边缘) → 逐点最小值聚合为速度函数 →
//! 快速行进初始化 + 测地线活动轮廓演化 → 输出水平集体数据.
//! 体积测量在输出水平集的 `-0.5` 等值面上进行.
//!
//! # 约定
//!
//! 1. 体素索引一律按 `(z, h, w)` 组织, 即 "切片, 高, 宽", 与 `ndarray`
//!   的行优先存储一致. 体素分辨率 (毫米) 也按该顺序给出.
//! 2. 物理坐标一律按 `(x, y, z)` 给出 (LPS), 单位为毫米.
//!   `x` 对应 `w` 方向, `y` 对应 `h` 方向, `z` 对应切片方向.
//! 3. 水平集内部为负, 外部为正.
//!
//! # 开发计划
//!
//! ### 体数据与几何 ✅
//!
//! 物理坐标与索引互转, ROI 裁剪, 方向归一化 (reorient).
//!
//! 实现位于 `lung-nodule/src/data`.
//!
//! ### 各向同性超采样 ✅
//!
//! 满足 Nyquist 准则的层内高斯预平滑 + 三线性插值.
//!
//! 实现位于 `lung-nodule/src/resample.rs`.
//!
//! ### 肺壁特征 (迭代多数投票空洞填充) ✅
//!
//! 实现位于 `lung-nodule/src/features/lung_wall.rs` 和
//! `lung-nodule/src/data/morph_3d`.
//!
//! ### 血管性 / sigmoid / 边缘特征, 最小值聚合 ✅
//!
//! 实现位于 `lung-nodule/src/features`.
//!
//! ### 快速行进 + 测地线活动轮廓 ✅
//!
//! 实现位于 `lung-nodule/src/level_set`.
//!
//! ### 流水线编排, 进度汇报与中止 ✅
//!
//! 实现位于 `lung-nodule/src/pipeline`.
//!
//! ### 等值面体积测量, STL 导出, 截图 ✅
//!
//! 实现位于 `lung-nodule/src/measure` 和 `lung-nodule/src/view`.
//!
//! ### GPU 版本空洞填充 ❌
//!
//! 不在计划内. CPU 版本通过 `rayon` 并行.

/// 三维索引 `(z, h, w)`.
pub type Idx3d = (usize, usize, usize);

/// 物理空间中的点 `(x, y, z)`, 单位为毫米.
pub type Point3 = [f64; 3];

#[macro_use]
mod macros;

pub mod consts;

mod error;

pub use error::{GeometryError, InputError, SegError, SegResult};

/// 3D 体数据基础数据结构.
mod data;

pub use data::region::Region;
pub use data::window::CtWindow;
pub use data::{CtVolume, Grid, GridAttr, MaskVolume, Volume};

pub use data::morph_3d;

pub mod io;

pub mod filters;

pub mod resample;

pub mod features;

pub mod progress;

pub mod level_set;

pub mod pipeline;

pub mod measure;

pub mod view;

pub mod prelude;
