//! 体数据滤波: 高斯平滑, 有限差分导数, Hessian 特征值.
//!
//! 所有尺度参数 (sigma) 以毫米为单位, 按各轴分辨率换算为体素单位.

mod gaussian;
mod hessian;

pub use gaussian::{gaussian_kernel, smooth_along, smooth_axes, smooth_isotropic};
pub use hessian::{hessian_at, symmetric_eigenvalues};

use ndarray::{Array3, ArrayView3, Zip};

/// 沿第 `axis` 维 (数组维度, 0 = z) 在 `idx` 处移动 `delta` 步, 越界时截断到边界.
#[inline]
pub(crate) fn clamped_step((z, h, w): crate::Idx3d, axis: usize, delta: isize, n: usize) -> crate::Idx3d {
    let mv = |i: usize| (i as isize + delta).clamp(0, n as isize - 1) as usize;
    match axis {
        0 => (mv(z), h, w),
        1 => (z, mv(h), w),
        _ => (z, h, mv(w)),
    }
}

/// 中心差分梯度 (物理单位), 边界处退化为单侧差分. 返回 `[d/dz, d/dh, d/dw]`.
pub fn gradient(data: ArrayView3<f32>, spacing: [f64; 3]) -> [Array3<f32>; 3] {
    let dims = data.dim();
    let n = [dims.0, dims.1, dims.2];
    std::array::from_fn(|axis| {
        let mut out = Array3::<f32>::zeros(dims);
        zip_for_each!(Zip::indexed(&mut out), |idx, g: &mut f32| {
            let lo = clamped_step(idx, axis, -1, n[axis]);
            let hi = clamped_step(idx, axis, 1, n[axis]);
            let steps = match axis {
                0 => hi.0 - lo.0,
                1 => hi.1 - lo.1,
                _ => hi.2 - lo.2,
            };
            if steps > 0 {
                *g = ((data[hi] - data[lo]) as f64 / (steps as f64 * spacing[axis])) as f32;
            }
        });
        out
    })
}

/// 梯度模长.
pub fn gradient_magnitude(data: ArrayView3<f32>, spacing: [f64; 3]) -> Array3<f32> {
    let [gz, gh, gw] = gradient(data, spacing);
    let mut out = gz;
    zip_for_each!(Zip::from(&mut out).and(&gh).and(&gw), |a: &mut f32, &b: &f32, &c: &f32| {
        *a = (*a * *a + b * b + c * c).sqrt();
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_of_linear_ramp() {
        // f = 2 * x_mm, x 方向分辨率 0.5.
        let data = Array3::from_shape_fn((3, 4, 6), |(_, _, w)| (w as f32) * 0.5 * 2.0);
        let [gz, gh, gw] = gradient(data.view(), [1.0, 1.0, 0.5]);
        assert!(gz.iter().all(|&v| v == 0.0));
        assert!(gh.iter().all(|&v| v == 0.0));
        assert!(gw.iter().all(|&v| (v - 2.0).abs() < 1e-5));

        let mag = gradient_magnitude(data.view(), [1.0, 1.0, 0.5]);
        assert!((mag[(1, 2, 0)] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_clamped_step() {
        assert_eq!(clamped_step((0, 0, 0), 0, -1, 5), (0, 0, 0));
        assert_eq!(clamped_step((0, 3, 0), 1, 1, 4), (0, 3, 0));
        assert_eq!(clamped_step((0, 0, 2), 2, 1, 4), (0, 0, 3));
    }
}
