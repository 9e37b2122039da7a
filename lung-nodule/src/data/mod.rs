use std::ops::{Index, IndexMut};

use ndarray::{s, Array3, ArrayView3, ArrayViewMut3, Axis};
use num::ToPrimitive;

use crate::{GeometryError, Idx3d, Point3, SegError, SegResult};

pub mod morph_3d;
pub mod region;
pub mod window;

use region::Region;

/// 判断两个浮点数是否 "足够接近". 用于比较分辨率/原点等几何信息.
#[inline]
pub(crate) fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * (1.0 + a.abs().max(b.abs()))
}

/// 单位方向矩阵.
pub const IDENTITY_DIRECTION: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// 体数据所在的采样网格.
///
/// `direction[r][c]` 是第 `c` 个索引轴在第 `r` 个物理轴上的分量,
/// 其中索引轴 `c = 0, 1, 2` 分别为 `w, h, z`, 与物理轴 `x, y, z` 的顺序一致.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Grid {
    shape: Idx3d,
    spacing: [f64; 3],
    origin: Point3,
    direction: [[f64; 3]; 3],
}

impl Grid {
    /// 创建原点为零, 方向为单位阵的网格. `spacing` 按 `(z, h, w)` 给出.
    pub fn new(shape: Idx3d, spacing: [f64; 3]) -> Self {
        Self {
            shape,
            spacing,
            origin: [0.0; 3],
            direction: IDENTITY_DIRECTION,
        }
    }

    /// 替换原点.
    #[inline]
    pub fn with_origin(mut self, origin: Point3) -> Self {
        self.origin = origin;
        self
    }

    /// 替换方向矩阵.
    #[inline]
    pub fn with_direction(mut self, direction: [[f64; 3]; 3]) -> Self {
        self.direction = direction;
        self
    }

    /// 形状 `(z, h, w)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 体素分辨率 `(z, h, w)`, 毫米.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 索引 `(0, 0, 0)` 处体素中心的物理坐标.
    #[inline]
    pub fn origin(&self) -> Point3 {
        self.origin
    }

    /// 方向矩阵.
    #[inline]
    pub fn direction(&self) -> [[f64; 3]; 3] {
        self.direction
    }

    /// 方向矩阵是否为单位阵.
    pub fn is_identity_direction(&self) -> bool {
        self.direction
            .iter()
            .flatten()
            .zip(IDENTITY_DIRECTION.iter().flatten())
            .all(|(&a, &b)| approx_eq(a, b))
    }

    /// 连续索引 `(z, h, w)` 对应的物理坐标.
    pub fn continuous_index_to_physical(&self, [z, h, w]: [f64; 3]) -> Point3 {
        let [sz, sh, sw] = self.spacing;
        let v = [w * sw, h * sh, z * sz];
        let d = &self.direction;
        let mut p = self.origin;
        for (r, p) in p.iter_mut().enumerate() {
            *p += d[r][0] * v[0] + d[r][1] * v[1] + d[r][2] * v[2];
        }
        p
    }

    /// 整数索引对应的物理坐标.
    #[inline]
    pub fn index_to_physical(&self, (z, h, w): Idx3d) -> Point3 {
        self.continuous_index_to_physical([z as f64, h as f64, w as f64])
    }

    /// 物理坐标对应的连续索引 `(z, h, w)`. 方向矩阵须为正交阵.
    pub fn physical_to_continuous_index(&self, p: Point3) -> [f64; 3] {
        let [sz, sh, sw] = self.spacing;
        let d = &self.direction;
        let q = [p[0] - self.origin[0], p[1] - self.origin[1], p[2] - self.origin[2]];
        // 正交阵的逆即转置.
        let v: [f64; 3] = std::array::from_fn(|c| d[0][c] * q[0] + d[1][c] * q[1] + d[2][c] * q[2]);
        [v[2] / sz, v[1] / sh, v[0] / sw]
    }

    /// 物理坐标对应的最近整数索引. 可能越界, 因此返回有符号值.
    #[inline]
    pub fn physical_to_index(&self, p: Point3) -> [i64; 3] {
        self.physical_to_continuous_index(p)
            .map(|c| c.round() as i64)
    }

    /// 物理坐标对应的最近整数索引. 越界时返回 `None`.
    pub fn physical_to_valid_index(&self, p: Point3) -> Option<Idx3d> {
        let [z, h, w] = self.physical_to_index(p);
        let (nz, nh, nw) = self.shape;
        let valid = |i: i64, n: usize| i >= 0 && (i as usize) < n;
        (valid(z, nz) && valid(h, nh) && valid(w, nw)).then_some((
            z as usize,
            h as usize,
            w as usize,
        ))
    }

    /// 两个网格是否完全重合 (形状, 分辨率, 原点, 方向).
    pub fn same_lattice(&self, other: &Self) -> bool {
        let close = |a: &[f64], b: &[f64]| a.iter().zip(b).all(|(&a, &b)| approx_eq(a, b));
        self.shape == other.shape
            && close(&self.spacing, &other.spacing)
            && close(&self.origin, &other.origin)
            && (0..3).all(|r| close(&self.direction[r], &other.direction[r]))
    }

    /// 检查 `other` 与自身是否重合, 不重合时返回错误.
    pub fn ensure_same_lattice(&self, other: &Self) -> SegResult<()> {
        if self.shape != other.shape {
            return Err(GeometryError::ShapeMismatch {
                expected: self.shape,
                found: other.shape,
            }
            .into());
        }
        if !self.same_lattice(other) {
            return Err(GeometryError::LatticeMismatch(format!(
                "spacing {:?} / origin {:?} vs spacing {:?} / origin {:?}",
                self.spacing, self.origin, other.spacing, other.origin
            ))
            .into());
        }
        Ok(())
    }
}

/// 带网格信息的体数据的共用属性.
pub trait GridAttr {
    /// 获取网格.
    fn grid(&self) -> &Grid;

    /// 获取数据形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        self.grid().shape()
    }

    /// 获取水平切片个数.
    #[inline]
    fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表空间 (相邻切片方向),
    /// 高 (自然图像的垂直方向), 宽 (自然图像的水平方向).
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        self.grid().spacing()
    }

    /// 三个方向中最粗的分辨率.
    #[inline]
    fn max_spacing(&self) -> f64 {
        self.pix_dim().into_iter().fold(f64::MIN, f64::max)
    }

    /// 三个方向中最细的分辨率.
    #[inline]
    fn min_spacing(&self) -> f64 {
        self.pix_dim().into_iter().fold(f64::MAX, f64::min)
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.pix_dim();
        approx_eq(z, h) && approx_eq(z, w)
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }
}

/// 一个网格 + 其上的逐体素数据.
#[derive(Debug, Clone)]
pub struct Volume<T> {
    grid: Grid,
    data: Array3<T>,
}

/// CT 扫描 (HU). HU 值以 `f32` 保存.
pub type CtVolume = Volume<f32>;

/// 二值掩膜. 取值为 `MASK_BACKGROUND` 或 `MASK_FOREGROUND`.
pub type MaskVolume = Volume<u8>;

impl<T> GridAttr for Volume<T> {
    #[inline]
    fn grid(&self) -> &Grid {
        &self.grid
    }
}

impl<T> Index<Idx3d> for Volume<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<Idx3d> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl<T> Volume<T> {
    /// 由网格和数据创建体数据. 二者形状不一致时返回错误.
    pub fn new(grid: Grid, data: Array3<T>) -> SegResult<Self> {
        if data.dim() != grid.shape() {
            return Err(GeometryError::ShapeMismatch {
                expected: grid.shape(),
                found: data.dim(),
            }
            .into());
        }
        Ok(Self { grid, data })
    }

    /// 获取数据视图.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, T> {
        self.data.view()
    }

    /// 获取可变数据视图.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut3<'_, T> {
        self.data.view_mut()
    }

    /// 拆出网格和数据.
    #[inline]
    pub fn into_parts(self) -> (Grid, Array3<T>) {
        (self.grid, self.data)
    }

    /// 逐体素映射, 网格不变.
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Volume<U> {
        Volume {
            grid: self.grid.clone(),
            data: self.data.map(f),
        }
    }

    /// 在同一网格上替换数据.
    pub fn with_data<U>(&self, data: Array3<U>) -> SegResult<Volume<U>> {
        Volume::new(self.grid.clone(), data)
    }
}

impl<T: Clone> Volume<T> {
    /// 全部体素取同一个值.
    pub fn from_elem(grid: Grid, v: T) -> Self {
        let data = Array3::from_elem(grid.shape(), v);
        Self { grid, data }
    }

    /// 在 `region` 内裁剪出子体数据. 子体数据原点为 `region` 起点体素的物理坐标,
    /// 分辨率和方向保持不变.
    ///
    /// `region` 须完全位于图像内部, 否则返回错误. 通常先用 [`Region::crop`]
    /// 求与整幅图像的交集.
    pub fn crop(&self, region: &Region) -> SegResult<Self> {
        let whole = Region::whole(self.shape());
        if region.is_empty() || !whole.contains_region(region) {
            return Err(GeometryError::EmptyRegion(format!(
                "{region:?} is not inside {whole:?}"
            ))
            .into());
        }
        let (z0, h0, w0) = region.start();
        let (z1, h1, w1) = region.end();
        let data = self.data.slice(s![z0..z1, h0..h1, w0..w1]).to_owned();
        let grid = Grid {
            shape: data.dim(),
            origin: self.grid.index_to_physical((z0, h0, w0)),
            ..self.grid.clone()
        };
        Ok(Self { grid, data })
    }

    /// 重排/翻转索引轴, 使方向矩阵变为单位阵. 每个体素的物理位置不变.
    ///
    /// 方向矩阵须近似为带符号的置换阵, 否则返回 `GeometryError::ObliqueDirection`.
    /// 含长度为 0 的轴时返回 `InvalidInput`.
    pub fn reorient_to_identity(&self) -> SegResult<Self> {
        if self.grid.is_identity_direction() {
            return Ok(self.clone());
        }
        if self.size() == 0 {
            return Err(SegError::InvalidInput(format!(
                "cannot reorient an empty volume of shape {:?}",
                self.shape()
            )));
        }

        let d = &self.grid.direction;
        // perm[c]: 索引轴 c 对应的物理轴; flip[c]: 是否反向.
        let mut perm = [0_usize; 3];
        let mut flip = [false; 3];
        for c in 0..3 {
            let (r, v) = (0..3)
                .map(|r| (r, d[r][c]))
                .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
                .ok_or(SegError::Geometry(GeometryError::ObliqueDirection))?;
            if v.abs() < 0.5 {
                return Err(GeometryError::ObliqueDirection.into());
            }
            perm[c] = r;
            flip[c] = v < 0.0;
        }
        let mut seen = [false; 3];
        for &r in &perm {
            if std::mem::replace(&mut seen[r], true) {
                return Err(GeometryError::ObliqueDirection.into());
            }
        }

        // 索引轴 c 在数组中是第 `2 - c` 维.
        let (nz, nh, nw) = self.shape();
        let n = [nw, nh, nz];
        let old_spacing = {
            let [sz, sh, sw] = self.grid.spacing;
            [sw, sh, sz]
        };
        let mut axes = [0_usize; 3];
        let mut spacing_xyz = [0.0; 3];
        let mut first = [0_usize; 3];
        for c in 0..3 {
            axes[2 - perm[c]] = 2 - c;
            spacing_xyz[perm[c]] = old_spacing[c];
            first[c] = if flip[c] { n[c] - 1 } else { 0 };
        }
        let origin = self.grid.index_to_physical((first[2], first[1], first[0]));

        let mut view = self.data.view().permuted_axes(axes);
        for c in 0..3 {
            if flip[c] {
                view.invert_axis(Axis(2 - perm[c]));
            }
        }
        let data = view.as_standard_layout().into_owned();
        let grid = Grid {
            shape: data.dim(),
            spacing: [spacing_xyz[2], spacing_xyz[1], spacing_xyz[0]],
            origin,
            direction: IDENTITY_DIRECTION,
        };
        Ok(Self { grid, data })
    }
}

impl<T: ToPrimitive> Volume<T> {
    /// 转为 `f32` 体数据. 无法表示的值记为 `NaN`.
    pub fn to_f32(&self) -> Volume<f32> {
        self.map(|v| v.to_f32().unwrap_or(f32::NAN))
    }
}
