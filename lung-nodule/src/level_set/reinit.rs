//! 把水平集重新初始化为窄带内的带符号距离函数.

use ndarray::{Array3, Zip};

use super::fast_marching::FastMarching;
use crate::Idx3d;

/// `idx` 到零等值面的距离估计. 仅当 `idx` 与某个 6 邻居符号相反时返回 `Some`.
///
/// 各轴上用线性插值求零点位置, 再按 `1 / d^2 = sum(1 / d_i^2)` 合并.
fn interface_distance(phi: &Array3<f32>, idx: Idx3d, spacing: [f64; 3]) -> Option<f64> {
    let (nz, nh, nw) = phi.dim();
    let n = [nz, nh, nw];
    let a = f64::from(phi[idx]);
    let inside = a < 0.0;
    let at = [idx.0, idx.1, idx.2];

    let mut inv_sq = 0.0;
    let mut found = false;
    for axis in 0..3 {
        let mut best: Option<f64> = None;
        for delta in [-1_isize, 1] {
            let j = at[axis] as isize + delta;
            if j < 0 || j >= n[axis] as isize {
                continue;
            }
            let mut nb = at;
            nb[axis] = j as usize;
            let b = f64::from(phi[(nb[0], nb[1], nb[2])]);
            if (b < 0.0) == inside {
                continue;
            }
            let denom = a.abs() + b.abs();
            let d = if denom > 0.0 {
                spacing[axis] * a.abs() / denom
            } else {
                0.0
            };
            best = Some(best.map_or(d, |x: f64| x.min(d)));
        }
        if let Some(d) = best {
            found = true;
            if d <= f64::EPSILON {
                return Some(0.0);
            }
            inv_sq += 1.0 / (d * d);
        }
    }
    found.then(|| 1.0 / inv_sq.sqrt())
}

/// 重新初始化 `phi`: 零等值面位置不变, 窄带 `band` (毫米) 内为带符号距离, 窄带外为 `±band`.
///
/// 返回零等值面两侧的体素个数. 没有零等值面时全部置为 `±band`.
pub fn reinitialize(phi: &mut Array3<f32>, spacing: [f64; 3], band: f64) -> usize {
    let shape = phi.dim();
    let mut inner = Vec::new();
    let mut outer = Vec::new();
    for (idx, &v) in phi.indexed_iter() {
        if let Some(d) = interface_distance(phi, idx, spacing) {
            if v < 0.0 {
                inner.push((idx, d));
            } else {
                outer.push((idx, d));
            }
        }
    }

    let march = |points: Vec<(Idx3d, f64)>, outside: bool| {
        let speed = phi.map(|&v| if (v >= 0.0) == outside { 1.0_f32 } else { 0.0 });
        FastMarching::new(shape, spacing)
            .with_speed(speed.view())
            .with_stopping_value(band)
            .run(points)
    };
    let interface = inner.len() + outer.len();
    let t_in = march(inner, false);
    let t_out = march(outer, true);

    zip_for_each!(
        Zip::from(&mut *phi).and(&t_in).and(&t_out),
        |p: &mut f32, &ti: &f64, &to: &f64| {
            *p = if *p < 0.0 {
                // 保持严格为负.
                -(ti.clamp(f64::from(f32::MIN_POSITIVE), band) as f32)
            } else {
                to.min(band) as f32
            };
        }
    );
    interface
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_becomes_distance() {
        // 零点位于 w = 4.25; 原值被任意缩放.
        let mut phi = Array3::from_shape_fn((3, 3, 12), |(_, _, w)| (w as f32 - 4.25) * 7.0);
        let n = reinitialize(&mut phi, [1.0; 3], 3.0);
        assert_eq!(n, 18);
        assert!((phi[(1, 1, 4)] + 0.25).abs() < 1e-5);
        assert!((phi[(1, 1, 5)] - 0.75).abs() < 1e-5);
        assert!((phi[(1, 1, 6)] - 1.75).abs() < 1e-5);
        assert!((phi[(1, 1, 2)] + 2.25).abs() < 1e-5);
        assert_eq!(phi[(1, 1, 11)], 3.0);
        assert_eq!(phi[(1, 1, 0)], -3.0);
    }

    #[test]
    fn test_no_interface() {
        let mut phi = Array3::from_elem((4, 4, 4), 0.3_f32);
        assert_eq!(reinitialize(&mut phi, [1.0; 3], 2.0), 0);
        assert!(phi.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_sign_preserved() {
        let mut phi = Array3::from_shape_fn((9, 9, 9), |(z, h, w)| {
            let d = ((z as f32 - 4.0).powi(2) + (h as f32 - 4.0).powi(2) + (w as f32 - 4.0).powi(2)).sqrt();
            (d - 2.5) * 0.1
        });
        let before = phi.clone();
        reinitialize(&mut phi, [1.0; 3], 4.0);
        for (a, b) in before.iter().zip(phi.iter()) {
            assert_eq!(*a < 0.0, *b < 0.0);
        }
    }
}
