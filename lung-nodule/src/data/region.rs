//! 索引空间中的轴对齐长方体区域.

use super::Grid;
use crate::{GeometryError, Idx3d, Point3, SegResult};

/// 索引空间中的轴对齐长方体. 起点和大小均按 `(z, h, w)` 给出.
///
/// 起点可以为负 (例如来自图像外的物理坐标), 与图像求交集后才能用于裁剪.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    index: [i64; 3],
    size: [usize; 3],
}

impl Region {
    /// 创建区域.
    #[inline]
    pub const fn new(index: [i64; 3], size: [usize; 3]) -> Self {
        Self { index, size }
    }

    /// 覆盖形状为 `shape` 的整幅图像的区域.
    #[inline]
    pub const fn whole((z, h, w): Idx3d) -> Self {
        Self {
            index: [0; 3],
            size: [z, h, w],
        }
    }

    /// 由两个物理角点构造区域.
    ///
    /// 两个角点分别四舍五入到最近的索引, 各轴上较小者为起点, 大小为两索引之差的绝对值.
    /// 结果随后与整幅图像求交集; 交集为空时返回错误.
    pub fn from_physical_corners(grid: &Grid, p1: Point3, p2: Point3) -> SegResult<Self> {
        let a = grid.physical_to_index(p1);
        let b = grid.physical_to_index(p2);
        let index: [i64; 3] = std::array::from_fn(|k| a[k].min(b[k]));
        let size: [usize; 3] = std::array::from_fn(|k| a[k].abs_diff(b[k]) as usize);
        let roi = Self { index, size };
        roi.crop(&Self::whole(grid.shape())).ok_or_else(|| {
            GeometryError::EmptyRegion(format!(
                "ROI {roi:?} does not overlap image of shape {:?}",
                grid.shape()
            ))
            .into()
        })
    }

    /// 起点 (有符号).
    #[inline]
    pub fn index(&self) -> [i64; 3] {
        self.index
    }

    /// 各轴大小.
    #[inline]
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// 体素个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.size.iter().product()
    }

    /// 是否不含任何体素.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 起点. 起点为负时截断为零; 裁剪前应先求交集.
    #[inline]
    pub fn start(&self) -> Idx3d {
        let [z, h, w] = self.index.map(|i| i.max(0) as usize);
        (z, h, w)
    }

    /// 终点 (不含).
    #[inline]
    pub fn end(&self) -> Idx3d {
        let [z, h, w]: [usize; 3] =
            std::array::from_fn(|k| (self.index[k] + self.size[k] as i64).max(0) as usize);
        (z, h, w)
    }

    /// 求两区域的交集. 交集为空时返回 `None`.
    pub fn crop(&self, other: &Self) -> Option<Self> {
        let mut index = [0_i64; 3];
        let mut size = [0_usize; 3];
        for k in 0..3 {
            let lo = self.index[k].max(other.index[k]);
            let hi = (self.index[k] + self.size[k] as i64)
                .min(other.index[k] + other.size[k] as i64);
            if hi <= lo {
                return None;
            }
            index[k] = lo;
            size[k] = (hi - lo) as usize;
        }
        Some(Self { index, size })
    }

    /// 索引是否位于区域内.
    pub fn contains(&self, (z, h, w): &Idx3d) -> bool {
        [*z, *h, *w]
            .iter()
            .enumerate()
            .all(|(k, &i)| {
                let i = i as i64;
                i >= self.index[k] && i < self.index[k] + self.size[k] as i64
            })
    }

    /// `other` 是否完全位于区域内.
    pub fn contains_region(&self, other: &Self) -> bool {
        (0..3).all(|k| {
            other.index[k] >= self.index[k]
                && other.index[k] + other.size[k] as i64 <= self.index[k] + self.size[k] as i64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop() {
        let whole = Region::whole((10, 20, 30));
        let roi = Region::new([-2, 5, 25], [5, 5, 10]);
        let out = roi.crop(&whole).unwrap();
        assert_eq!(out, Region::new([0, 5, 25], [3, 5, 5]));
        assert_eq!(out.start(), (0, 5, 25));
        assert_eq!(out.end(), (3, 10, 30));
        assert!(Region::new([10, 0, 0], [1, 1, 1]).crop(&whole).is_none());
    }

    #[test]
    fn test_from_physical_corners() {
        let grid = Grid::new((10, 20, 30), [2.0, 1.0, 0.5]).with_origin([10.0, 0.0, -4.0]);
        // x: 11.0 → w = 2; 13.0 → w = 6. y: 3 → h = 3; 1 → h = 1. z: 0 → z = 2; 8 → z = 6.
        let roi = Region::from_physical_corners(&grid, [13.0, 1.0, 8.0], [11.0, 3.0, 0.0]).unwrap();
        assert_eq!(roi, Region::new([2, 1, 2], [4, 2, 4]));
        assert!(roi.contains(&(2, 1, 2)));
        assert!(!roi.contains(&(6, 1, 2)));
    }

    #[test]
    fn test_corners_outside_image() {
        let grid = Grid::new((10, 10, 10), [1.0; 3]);
        let far = Region::from_physical_corners(&grid, [100.0; 3], [200.0; 3]);
        assert!(far.is_err());

        // 与图像部分重叠时截断到图像内部.
        let part = Region::from_physical_corners(&grid, [-5.0; 3], [5.0; 3]).unwrap();
        assert_eq!(part, Region::new([0; 3], [5; 3]));
    }
}
