//! 运行时错误.

use crate::Idx3d;
use std::fmt;
use std::path::Path;

/// `Result` 别名.
pub type SegResult<T> = Result<T, SegError>;

/// 读写文件时的错误.
#[derive(Debug)]
pub enum InputError {
    /// 文件不存在, 或文件格式无法识别.
    Read(String),

    /// DICOM 目录下没有任何可用序列.
    EmptySeries(String),

    /// 格式可以识别, 但内容不受支持 (例如压缩传输语法, 非三维数据).
    Unsupported(String),

    /// 写文件失败.
    Write(String),
}

/// 几何关系错误.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// ROI 与图像没有交集, 或 ROI 为空.
    EmptyRegion(String),

    /// 两个体数据不在同一网格上.
    ShapeMismatch {
        /// 期望的形状.
        expected: Idx3d,
        /// 实际的形状.
        found: Idx3d,
    },

    /// 形状一致但分辨率/原点/方向不一致.
    LatticeMismatch(String),

    /// 方向矩阵不是 (近似) 轴对齐的正交阵, 无法重排轴.
    ObliqueDirection,
}

/// crate 的统一错误类型.
#[derive(Debug)]
pub enum SegError {
    /// 输入/输出错误.
    Input(InputError),

    /// 几何错误.
    Geometry(GeometryError),

    /// 参数不合法 (例如缺少种子点, 缺少输入图像).
    InvalidInput(String),

    /// 外部调用方请求中止.
    Cancelled,
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(s) => write!(f, "cannot read input: {s}"),
            Self::EmptySeries(dir) => write!(f, "no DICOM series found in `{dir}`"),
            Self::Unsupported(s) => write!(f, "unsupported input: {s}"),
            Self::Write(s) => write!(f, "cannot write output: {s}"),
        }
    }
}

impl InputError {
    /// 读取 `path` 失败.
    pub fn read_failed<E: fmt::Display>(path: &Path, e: E) -> Self {
        Self::Read(format!("{}: {e}", path.display()))
    }

    /// 写入 `path` 失败.
    pub fn write_failed<E: fmt::Display>(path: &Path, e: E) -> Self {
        Self::Write(format!("{}: {e}", path.display()))
    }
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRegion(s) => write!(f, "empty region: {s}"),
            Self::ShapeMismatch { expected, found } => {
                write!(f, "shape mismatch: expected {expected:?}, found {found:?}")
            }
            Self::LatticeMismatch(s) => write!(f, "lattice mismatch: {s}"),
            Self::ObliqueDirection => write!(f, "direction matrix is not axis aligned"),
        }
    }
}

impl fmt::Display for SegError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(e) => e.fmt(f),
            Self::Geometry(e) => e.fmt(f),
            Self::InvalidInput(s) => write!(f, "invalid input: {s}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl std::error::Error for InputError {}

impl std::error::Error for GeometryError {}

impl std::error::Error for SegError {}

impl From<InputError> for SegError {
    fn from(e: InputError) -> Self {
        Self::Input(e)
    }
}

impl From<GeometryError> for SegError {
    fn from(e: GeometryError) -> Self {
        Self::Geometry(e)
    }
}

impl From<nifti::NiftiError> for SegError {
    fn from(e: nifti::NiftiError) -> Self {
        Self::Input(InputError::Read(e.to_string()))
    }
}

impl From<image::ImageError> for SegError {
    fn from(e: image::ImageError) -> Self {
        Self::Input(InputError::Write(e.to_string()))
    }
}

impl From<ndarray::ShapeError> for SegError {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Input(InputError::Unsupported(e.to_string()))
    }
}

impl From<ndarray_npy::WriteNpyError> for SegError {
    fn from(e: ndarray_npy::WriteNpyError) -> Self {
        Self::Input(InputError::Write(e.to_string()))
    }
}

impl SegError {
    /// 是否由中止请求引起.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
