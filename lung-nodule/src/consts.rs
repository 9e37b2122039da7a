//! 通用常量.

/// 二值掩膜取值.
pub mod gray {
    /// 掩膜背景值.
    pub const MASK_BACKGROUND: u8 = 0;

    /// 掩膜前景值.
    pub const MASK_FOREGROUND: u8 = 255;

    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;

    /// 像素是否是前景?
    #[inline]
    pub const fn is_foreground(p: u8) -> bool {
        matches!(p, MASK_FOREGROUND)
    }

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        !is_foreground(p)
    }
}

/// CT HU 值.
pub mod hu {
    /// 空气. 重采样越界时的填充值.
    pub const AIR: f32 = -1000.0;

    /// 肺壁特征的默认下阈值.
    pub const LUNG_THRESHOLD: f32 = -400.0;

    /// 肺壁特征的上阈值. 高于该值的体素 (如金属伪影) 视为背景.
    pub const LUNG_THRESHOLD_UPPER: f32 = 3000.0;

    /// 实性结节的 sigmoid beta.
    pub const SOLID_SIGMOID_BETA: f64 = -200.0;

    /// 亚实性 (部分实性) 结节的 sigmoid beta.
    pub const PART_SOLID_SIGMOID_BETA: f64 = -500.0;
}

/// 从输出水平集中提取分割表面时使用的等值.
///
/// 略小于 0, 使边界体素被完整包含.
pub const SEGMENTATION_ISO_VALUE: f64 = -0.5;

/// 体素/像素类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ElemType {
    /// `MASK_BACKGROUND`, 代表背景.
    Background,

    /// `MASK_FOREGROUND`, 代表前景.
    Foreground,
}

impl ElemType {
    /// 由掩膜像素值判断类型.
    #[inline]
    pub const fn of(p: u8) -> Self {
        if gray::is_foreground(p) {
            Self::Foreground
        } else {
            Self::Background
        }
    }

    /// 是否为前景.
    #[inline]
    pub fn is_foreground(&self) -> bool {
        matches!(self, Self::Foreground)
    }

    /// 是否为背景.
    #[inline]
    pub fn is_background(&self) -> bool {
        !self.is_foreground()
    }

    /// 对应的掩膜像素值.
    #[inline]
    pub const fn value(&self) -> u8 {
        match self {
            Self::Background => gray::MASK_BACKGROUND,
            Self::Foreground => gray::MASK_FOREGROUND,
        }
    }
}
