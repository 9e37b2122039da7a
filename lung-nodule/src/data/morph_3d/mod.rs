//! 3D 形态学操作.
//!
//! 目前只有迭代多数投票空洞填充, 用于从阈值化的肺部掩膜中得到 "实心" 肺区域.

use ndarray::{Array3, Zip};

use crate::consts::gray::*;
use crate::consts::ElemType;

mod integral;

use integral::IntegralVolume;

/// 空洞填充的终止原因.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HoleFillStatus {
    /// 某次迭代没有任何体素被改变.
    Converged,

    /// 达到迭代次数上限时仍有体素被改变. 结果仍然可用, 但不一定是不动点.
    IterationCapReached,
}

/// 空洞填充的运行统计.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HoleFillReport {
    /// 实际执行的迭代次数 (包括最后一次没有改变的迭代).
    pub iterations: usize,

    /// 被改为前景的体素总数.
    pub filled: usize,

    /// 终止原因.
    pub status: HoleFillStatus,
}

/// 迭代多数投票空洞填充.
///
/// 每次迭代中, 一个背景体素若其长方体邻域 (不含自身) 内的前景体素数不少于
/// `(n - 1) / 2 + majority`, 则变为前景. 其中 `n` 为邻域内 **位于图像内部** 的体素个数
/// (含自身), 因此图像边界处的邻域被截断而不是补零. 前景体素从不改变.
///
/// 一次迭代中所有体素同时更新 (读旧掩膜, 写新掩膜).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VotingHoleFill {
    radius: [usize; 3],
    majority: usize,
    max_iterations: usize,
}

impl VotingHoleFill {
    /// 默认多数阈值.
    pub const DEFAULT_MAJORITY: usize = 1;

    /// 默认迭代上限.
    pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

    /// 以 `(z, h, w)` 方向的体素半径创建.
    pub fn new(radius: [usize; 3]) -> Self {
        Self {
            radius,
            majority: Self::DEFAULT_MAJORITY,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
        }
    }

    /// 把毫米半径换算为各方向的体素半径, 并保证每个方向不少于 `min_voxels`.
    pub fn radius_for_spacing(radius_mm: f64, spacing: [f64; 3], min_voxels: usize) -> [usize; 3] {
        spacing.map(|s| ((radius_mm / s).ceil() as usize).max(min_voxels))
    }

    /// 设置多数阈值.
    #[inline]
    pub fn with_majority(mut self, majority: usize) -> Self {
        self.majority = majority;
        self
    }

    /// 设置迭代上限. 上限为 0 时不做任何迭代.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// 体素半径.
    #[inline]
    pub fn radius(&self) -> [usize; 3] {
        self.radius
    }

    /// 执行一次迭代, 返回被改为前景的体素个数.
    pub fn step(&self, mask: &mut Array3<u8>) -> usize {
        let integral = IntegralVolume::from_mask(mask.view());
        let (nz, nh, nw) = mask.dim();
        let [rz, rh, rw] = self.radius;
        let majority = self.majority;

        let mut next = mask.clone();
        zip_for_each!(Zip::indexed(&mut next), |(z, h, w), p: &mut u8| {
            if ElemType::of(*p).is_foreground() {
                return;
            }
            let lo = (z.saturating_sub(rz), h.saturating_sub(rh), w.saturating_sub(rw));
            let hi = ((z + rz + 1).min(nz), (h + rh + 1).min(nh), (w + rw + 1).min(nw));
            let n = (hi.0 - lo.0) * (hi.1 - lo.1) * (hi.2 - lo.2);
            if integral.sum(lo, hi) >= (n - 1) / 2 + majority {
                *p = MASK_FOREGROUND;
            }
        });

        let changed = Zip::from(&next)
            .and(&*mask)
            .fold(0, |acc, a, b| acc + usize::from(a != b));
        *mask = next;
        changed
    }

    /// 迭代直到没有体素改变, 或达到迭代上限.
    pub fn run(&self, mask: &mut Array3<u8>) -> HoleFillReport {
        let mut filled = 0;
        for i in 1..=self.max_iterations {
            let changed = self.step(mask);
            filled += changed;
            if changed == 0 {
                return HoleFillReport {
                    iterations: i,
                    filled,
                    status: HoleFillStatus::Converged,
                };
            }
        }
        HoleFillReport {
            iterations: self.max_iterations,
            filled,
            status: HoleFillStatus::IterationCapReached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    /// 11^3 全前景, 中心挖去 3^3 的空洞.
    fn cube_with_hole() -> Array3<u8> {
        let mut mask = Array3::from_elem((11, 11, 11), MASK_FOREGROUND);
        mask.slice_mut(s![4..7, 4..7, 4..7]).fill(MASK_BACKGROUND);
        mask
    }

    #[test]
    fn test_fill_cavity() {
        let mut mask = cube_with_hole();
        let report = VotingHoleFill::new([1; 3]).run(&mut mask);
        // 第一次填充角点和棱, 第二次填充面心和体心, 第三次没有改变.
        assert_eq!(report.iterations, 3);
        assert_eq!(report.filled, 27);
        assert_eq!(report.status, HoleFillStatus::Converged);
        assert!(mask.iter().all(|&p| is_foreground(p)));
    }

    #[test]
    fn test_idempotent() {
        let mut mask = cube_with_hole();
        let filler = VotingHoleFill::new([1; 3]);
        filler.run(&mut mask);
        let before = mask.clone();
        let again = filler.run(&mut mask);
        assert_eq!(again.iterations, 1);
        assert_eq!(again.filled, 0);
        assert_eq!(mask, before);
    }

    #[test]
    fn test_iteration_cap() {
        let mut mask = cube_with_hole();
        let report = VotingHoleFill::new([1; 3])
            .with_max_iterations(1)
            .run(&mut mask);
        assert_eq!(report.status, HoleFillStatus::IterationCapReached);
        assert_eq!(report.filled, 20);
        assert!(is_background(mask[(5, 5, 5)]));
    }

    #[test]
    fn test_background_is_stable() {
        let mut mask = Array3::from_elem((5, 6, 7), MASK_BACKGROUND);
        mask[(2, 3, 3)] = MASK_FOREGROUND;
        let report = VotingHoleFill::new([1; 3]).run(&mut mask);
        assert_eq!(report.filled, 0);
        assert_eq!(report.status, HoleFillStatus::Converged);
    }

    #[test]
    fn test_truncated_neighborhood_at_corner() {
        // 角点体素只有 7 个图像内邻居, 全为前景, 阈值为 (8 - 1) / 2 + 1 = 4.
        let mut mask = Array3::from_elem((4, 4, 4), MASK_FOREGROUND);
        mask[(0, 0, 0)] = MASK_BACKGROUND;
        assert_eq!(VotingHoleFill::new([1; 3]).step(&mut mask), 1);
    }

    #[test]
    fn test_radius_for_spacing() {
        let r = VotingHoleFill::radius_for_spacing(3.0, [2.5, 0.7, 0.5], 3);
        assert_eq!(r, [3, 5, 6]);
    }
}
