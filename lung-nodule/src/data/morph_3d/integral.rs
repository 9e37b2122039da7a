use ndarray::{s, Array3, ArrayView3, Axis};

use crate::consts::gray::is_foreground;
use crate::Idx3d;

/// 前景计数的三维积分图. `table[z, h, w]` 为 `[0, z) x [0, h) x [0, w)` 内前景体素个数.
pub(super) struct IntegralVolume {
    table: Array3<u32>,
}

impl IntegralVolume {
    pub(super) fn from_mask(mask: ArrayView3<u8>) -> Self {
        let (z, h, w) = mask.dim();
        let mut table = Array3::<u32>::zeros((z + 1, h + 1, w + 1));
        table
            .slice_mut(s![1.., 1.., 1..])
            .zip_mut_with(&mask, |t, &p| *t = u32::from(is_foreground(p)));
        for axis in 0..3 {
            table.accumulate_axis_inplace(Axis(axis), |&prev, curr| *curr += prev);
        }
        Self { table }
    }

    /// 长方体 `[lo, hi)` 内的前景体素个数.
    pub(super) fn sum(&self, lo: Idx3d, hi: Idx3d) -> usize {
        let t = |z, h, w| i64::from(self.table[(z, h, w)]);
        let v = t(hi.0, hi.1, hi.2)
            - t(lo.0, hi.1, hi.2)
            - t(hi.0, lo.1, hi.2)
            - t(hi.0, hi.1, lo.2)
            + t(lo.0, lo.1, hi.2)
            + t(lo.0, hi.1, lo.2)
            + t(hi.0, lo.1, lo.2)
            - t(lo.0, lo.1, lo.2);
        v as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::gray::MASK_FOREGROUND;

    #[test]
    fn test_box_sum() {
        let mask = Array3::from_shape_fn((4, 5, 6), |(z, h, w)| {
            if (z + h + w) % 2 == 0 {
                MASK_FOREGROUND
            } else {
                0
            }
        });
        let integral = IntegralVolume::from_mask(mask.view());
        let lo = (1, 0, 2);
        let hi = (4, 3, 5);
        let expected = mask
            .slice(s![1..4, 0..3, 2..5])
            .iter()
            .filter(|&&p| is_foreground(p))
            .count();
        assert_eq!(integral.sum(lo, hi), expected);
        assert_eq!(integral.sum((0, 0, 0), (4, 5, 6)), 60);
    }
}
