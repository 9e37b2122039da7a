//! 快速行进法求解 Eikonal 方程 `|grad T| * F = 1`.

use binary_heap_plus::BinaryHeap;
use ndarray::{Array3, ArrayView3};

use crate::Idx3d;

/// 体素状态.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Far,
    Trial,
    Known,
}

/// 速度不超过该值的体素视为不可到达.
const MIN_SPEED: f64 = 1e-6;

/// 快速行进求解器.
///
/// 从若干试探点出发, 按到达时间由小到大依次确定各体素的到达时间, 直到下一个体素的
/// 到达时间超过 `stopping_value`. 未确定的体素保持为 `f64::INFINITY`; 已计算出暂定值的
/// 前沿体素保留暂定值.
pub struct FastMarching<'a> {
    shape: Idx3d,
    spacing: [f64; 3],
    speed: Option<ArrayView3<'a, f32>>,
    stopping_value: f64,
}

impl<'a> FastMarching<'a> {
    /// 单位速度, 不设上限. `spacing` 按 `(z, h, w)` 给出.
    pub fn new(shape: Idx3d, spacing: [f64; 3]) -> Self {
        Self {
            shape,
            spacing,
            speed: None,
            stopping_value: f64::INFINITY,
        }
    }

    /// 使用速度场. 速度场形状须与网格一致.
    pub fn with_speed(mut self, speed: ArrayView3<'a, f32>) -> Self {
        debug_assert_eq!(speed.dim(), self.shape);
        self.speed = Some(speed);
        self
    }

    /// 设置停止值.
    pub fn with_stopping_value(mut self, stopping_value: f64) -> Self {
        self.stopping_value = stopping_value;
        self
    }

    #[inline]
    fn speed_at(&self, idx: Idx3d) -> f64 {
        self.speed.map_or(1.0, |s| f64::from(s[idx]))
    }

    /// 6 邻域.
    fn neighbors(&self, (z, h, w): Idx3d) -> impl Iterator<Item = Idx3d> {
        let (nz, nh, nw) = self.shape;
        [
            (z > 0).then(|| (z - 1, h, w)),
            (z + 1 < nz).then_some((z + 1, h, w)),
            (h > 0).then(|| (z, h - 1, w)),
            (h + 1 < nh).then_some((z, h + 1, w)),
            (w > 0).then(|| (z, h, w - 1)),
            (w + 1 < nw).then_some((z, h, w + 1)),
        ]
        .into_iter()
        .flatten()
    }

    /// 一阶迎风格式求 `idx` 处的到达时间.
    fn solve(&self, idx: Idx3d, times: &Array3<f64>, state: &Array3<State>) -> f64 {
        let speed = self.speed_at(idx);
        if speed.is_nan() || speed <= MIN_SPEED {
            return f64::INFINITY;
        }
        let (z, h, w) = idx;
        let (nz, nh, nw) = self.shape;
        let known = |i: Idx3d| (state[i] == State::Known).then(|| times[i]);
        let axis_min = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut terms: Vec<(f64, f64)> = [
            axis_min(
                (z > 0).then(|| known((z - 1, h, w))).flatten(),
                (z + 1 < nz).then(|| known((z + 1, h, w))).flatten(),
            )
            .map(|t| (t, self.spacing[0])),
            axis_min(
                (h > 0).then(|| known((z, h - 1, w))).flatten(),
                (h + 1 < nh).then(|| known((z, h + 1, w))).flatten(),
            )
            .map(|t| (t, self.spacing[1])),
            axis_min(
                (w > 0).then(|| known((z, h, w - 1))).flatten(),
                (w + 1 < nw).then(|| known((z, h, w + 1))).flatten(),
            )
            .map(|t| (t, self.spacing[2])),
        ]
        .into_iter()
        .flatten()
        .collect();
        terms.sort_by(|a, b| a.0.total_cmp(&b.0));

        // sum((T - t_i)^2 / h_i^2) = 1 / F^2, 依次加入更大的 t_i.
        let mut solution = f64::INFINITY;
        let (mut a, mut b, mut c) = (0.0, 0.0, -1.0 / (speed * speed));
        for (t, h) in terms {
            if solution <= t {
                break;
            }
            let inv = 1.0 / (h * h);
            a += inv;
            b -= 2.0 * t * inv;
            c += t * t * inv;
            let disc = b * b - 4.0 * a * c;
            if disc < 0.0 {
                break;
            }
            solution = (-b + disc.sqrt()) / (2.0 * a);
        }
        solution
    }

    /// 以 `(索引, 初始时间)` 为试探点运行, 返回到达时间场.
    pub fn run<I>(&self, trial_points: I) -> Array3<f64>
    where
        I: IntoIterator<Item = (Idx3d, f64)>,
    {
        let mut times = Array3::from_elem(self.shape, f64::INFINITY);
        let mut state = Array3::from_elem(self.shape, State::Far);
        let mut heap = BinaryHeap::new_by(|a: &(f64, Idx3d), b: &(f64, Idx3d)| b.0.total_cmp(&a.0));

        for (idx, t) in trial_points {
            if t < times[idx] {
                times[idx] = t;
                state[idx] = State::Trial;
                heap.push((t, idx));
            }
        }

        while let Some((t, idx)) = heap.pop() {
            if state[idx] == State::Known || t > times[idx] {
                continue;
            }
            if t > self.stopping_value {
                break;
            }
            state[idx] = State::Known;
            for nb in self.neighbors(idx) {
                if state[nb] == State::Known {
                    continue;
                }
                let candidate = self.solve(nb, &times, &state);
                if candidate < times[nb] {
                    times[nb] = candidate;
                    state[nb] = State::Trial;
                    heap.push((candidate, nb));
                }
            }
        }
        times
    }
}
