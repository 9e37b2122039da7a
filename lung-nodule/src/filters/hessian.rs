use std::f64::consts::PI;

use ndarray::ArrayView3;

use super::clamped_step;
use crate::Idx3d;

/// 在 `idx` 处用有限差分求 Hessian 矩阵 (物理单位), 边界处复制边界值.
///
/// 返回 `[zz, hh, ww, zh, zw, hw]`.
pub fn hessian_at(data: ArrayView3<f32>, idx: Idx3d, spacing: [f64; 3]) -> [f64; 6] {
    let (nz, nh, nw) = data.dim();
    let n = [nz, nh, nw];
    let f = |i: Idx3d| f64::from(data[i]);
    let center = f(idx);

    let second = |axis: usize| {
        let lo = clamped_step(idx, axis, -1, n[axis]);
        let hi = clamped_step(idx, axis, 1, n[axis]);
        (f(hi) - 2.0 * center + f(lo)) / (spacing[axis] * spacing[axis])
    };
    let mixed = |a: usize, b: usize| {
        let step = |i, da, db| clamped_step(clamped_step(i, a, da, n[a]), b, db, n[b]);
        let v = f(step(idx, 1, 1)) - f(step(idx, 1, -1)) - f(step(idx, -1, 1)) + f(step(idx, -1, -1));
        v / (4.0 * spacing[a] * spacing[b])
    };

    [second(0), second(1), second(2), mixed(0, 1), mixed(0, 2), mixed(1, 2)]
}

/// 3x3 实对称矩阵的特征值, 升序排列. 输入为 `[a00, a11, a22, a01, a02, a12]`.
///
/// 使用三角函数形式的闭式解.
pub fn symmetric_eigenvalues([a00, a11, a22, a01, a02, a12]: [f64; 6]) -> [f64; 3] {
    let p1 = a01 * a01 + a02 * a02 + a12 * a12;
    if p1 <= f64::EPSILON * (a00 * a00 + a11 * a11 + a22 * a22) {
        let mut d = [a00, a11, a22];
        d.sort_by(f64::total_cmp);
        return d;
    }

    let q = (a00 + a11 + a22) / 3.0;
    let p2 = (a00 - q).powi(2) + (a11 - q).powi(2) + (a22 - q).powi(2) + 2.0 * p1;
    let p = (p2 / 6.0).sqrt();

    // B = (A - qI) / p.
    let (b00, b11, b22) = ((a00 - q) / p, (a11 - q) / p, (a22 - q) / p);
    let (b01, b02, b12) = (a01 / p, a02 / p, a12 / p);
    let det = b00 * (b11 * b22 - b12 * b12) - b01 * (b01 * b22 - b12 * b02) + b02 * (b01 * b12 - b11 * b02);
    let phi = (det / 2.0).clamp(-1.0, 1.0).acos() / 3.0;

    let largest = q + 2.0 * p * phi.cos();
    let smallest = q + 2.0 * p * (phi + 2.0 * PI / 3.0).cos();
    let middle = 3.0 * q - largest - smallest;
    [smallest, middle, largest]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn close(a: [f64; 3], b: [f64; 3]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_eigenvalues_diagonal() {
        assert!(close(symmetric_eigenvalues([3.0, -1.0, 2.0, 0.0, 0.0, 0.0]), [-1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_eigenvalues_general() {
        // [[2, 1, 0], [1, 2, 0], [0, 0, 5]] 的特征值为 1, 3, 5.
        assert!(close(symmetric_eigenvalues([2.0, 2.0, 5.0, 1.0, 0.0, 0.0]), [1.0, 3.0, 5.0]));
        // 全 1 矩阵的特征值为 0, 0, 3.
        assert!(close(symmetric_eigenvalues([1.0; 6]), [0.0, 0.0, 3.0]));
    }

    #[test]
    fn test_hessian_of_quadratic() {
        // f = x^2 + 3 y z, 单位为毫米.
        let spacing = [2.0, 1.0, 0.5];
        let data = Array3::from_shape_fn((5, 5, 5), |(z, h, w)| {
            let (x, y, z) = (w as f64 * 0.5, h as f64 * 1.0, z as f64 * 2.0);
            (x * x + 3.0 * y * z) as f32
        });
        let [zz, hh, ww, zh, zw, hw] = hessian_at(data.view(), (2, 2, 2), spacing);
        assert!(zz.abs() < 1e-4);
        assert!(hh.abs() < 1e-4);
        assert!((ww - 2.0).abs() < 1e-4);
        assert!((zh - 3.0).abs() < 1e-4);
        assert!(zw.abs() < 1e-4);
        assert!(hw.abs() < 1e-4);
    }
}
