use ndarray::{Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Zip};

/// 归一化的一维高斯核. `sigma` 以体素为单位, 半径为 `ceil(3 sigma)`.
///
/// `sigma` 过小时返回 `[1.0]`, 即恒等变换.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma.is_nan() || sigma <= 1e-3 {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-(x * x) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// 一条线上的卷积. 越界部分不参与计算, 权重重新归一化.
fn convolve_lane(input: ArrayView1<f32>, mut output: ArrayViewMut1<f32>, kernel: &[f64]) {
    let n = input.len() as isize;
    let r = (kernel.len() / 2) as isize;
    for (i, o) in output.iter_mut().enumerate() {
        let (mut acc, mut weight) = (0.0, 0.0);
        for (k, &kv) in kernel.iter().enumerate() {
            let j = i as isize + k as isize - r;
            if (0..n).contains(&j) {
                acc += f64::from(input[j as usize]) * kv;
                weight += kv;
            }
        }
        *o = (acc / weight) as f32;
    }
}

/// 沿数组第 `axis` 维做高斯平滑. `sigma_mm` 以毫米为单位, `spacing` 为该轴分辨率.
pub fn smooth_along(data: ArrayView3<f32>, axis: usize, sigma_mm: f64, spacing: f64) -> Array3<f32> {
    let kernel = gaussian_kernel(sigma_mm / spacing);
    if kernel.len() == 1 {
        return data.to_owned();
    }
    let mut out = Array3::<f32>::zeros(data.raw_dim());
    let zip = Zip::from(out.lanes_mut(Axis(axis))).and(data.lanes(Axis(axis)));
    zip_for_each!(zip, |o, i| convolve_lane(i, o, &kernel));
    out
}

/// 依次沿 `axes` 中的各维做高斯平滑. `spacing` 按 `(z, h, w)` 给出.
pub fn smooth_axes(data: ArrayView3<f32>, axes: &[usize], sigma_mm: f64, spacing: [f64; 3]) -> Array3<f32> {
    let mut out = data.to_owned();
    for &axis in axes {
        out = smooth_along(out.view(), axis, sigma_mm, spacing[axis]);
    }
    out
}

/// 三个方向同时以 `sigma_mm` 做高斯平滑.
#[inline]
pub fn smooth_isotropic(data: ArrayView3<f32>, sigma_mm: f64, spacing: [f64; 3]) -> Array3<f32> {
    smooth_axes(data, &[0, 1, 2], sigma_mm, spacing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel() {
        let k = gaussian_kernel(1.0);
        assert_eq!(k.len(), 7);
        assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(k[3] > k[2] && k[2] == k[4]);
        assert_eq!(gaussian_kernel(0.0), vec![1.0]);
        assert_eq!(gaussian_kernel(f64::NAN), vec![1.0]);
    }

    #[test]
    fn test_constant_is_preserved() {
        let data = Array3::from_elem((5, 6, 7), -1000.0_f32);
        let out = smooth_isotropic(data.view(), 2.0, [1.0, 0.7, 0.7]);
        assert!(out.iter().all(|&v| (v + 1000.0).abs() < 1e-2));
    }

    #[test]
    fn test_only_selected_axis() {
        let mut data = Array3::<f32>::zeros((5, 5, 5));
        data[(2, 2, 2)] = 1.0;
        let out = smooth_along(data.view(), 2, 1.0, 1.0);
        assert!(out[(2, 2, 3)] > 0.0);
        assert_eq!(out[(2, 3, 2)], 0.0);
        assert_eq!(out[(3, 2, 2)], 0.0);
    }
}
