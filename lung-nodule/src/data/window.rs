use ndarray::{Array2, ArrayView2};

/// CT 窗口, 包含窗位 (window level) 和窗宽 (window width). 用于把 HU 值映射为灰度.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CtWindow {
    level: f32,
    width: f32,
}

impl CtWindow {
    /// 构建 CT 窗.
    ///
    /// `level` 和 `width` 必须在合理范围内, 否则返回 `None`.
    pub fn new(level: f32, width: f32) -> Option<CtWindow> {
        let valid = (-1e5..=1e5).contains(&level) && 0.0 < width && width <= 1e5;
        valid.then_some(Self { level, width })
    }

    /// 肺窗. 窗位 -600, 窗宽 1500.
    #[inline]
    pub const fn from_lung_visual() -> CtWindow {
        Self {
            level: -600.0,
            width: 1500.0,
        }
    }

    /// 纵隔窗. 窗位 40, 窗宽 400. 便于观察实性结节的边缘.
    #[inline]
    pub const fn from_mediastinal_visual() -> CtWindow {
        Self {
            level: 40.0,
            width: 400.0,
        }
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.level - self.width / 2.0
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.level + self.width / 2.0
    }

    /// 窗位.
    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    /// 求在当前 CT 窗设置下, `ct` HU 值对应的灰度值 (0.0 <= value <= 255.0).
    ///
    /// 如果 `ct` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval_f32(&self, ct: f32) -> Option<f32> {
        ct.is_finite()
            .then(|| ((ct - self.lower_bound()) / self.width).clamp(0.0, 1.0) * 255.0)
    }

    /// 同 [`eval_f32`](Self::eval_f32), 结果向下取整.
    #[inline]
    pub fn eval(&self, ct: f32) -> Option<u8> {
        self.eval_f32(ct).map(|v| v as u8)
    }

    /// 把一张 HU 切片映射为灰度图. 无意义的值映射为黑色.
    pub fn apply(&self, slice: ArrayView2<f32>) -> Array2<u8> {
        slice.map(|&ct| self.eval(ct).unwrap_or(u8::MIN))
    }
}
