//! 等值面提取与体积测量.
//!
//! 等值面用 marching tetrahedra 提取: 每个立方体单元沿主对角线剖分为 6 个四面体
//! (相邻单元的剖分在公共面上一致, 因此曲面没有裂缝). 网格外部一律视为 "外部",
//! 使得贴着图像边界的分割结果也能得到封闭曲面.
//!
//! 三角形一律朝外, 因此封闭曲面的体积可直接按散度定理求和.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use itertools::iproduct;
use log::debug;

use crate::consts::SEGMENTATION_ISO_VALUE;
use crate::{Grid, GridAttr, InputError, Point3, SegResult, Volume};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 三角形 (物理坐标).
pub type Triangle = [Point3; 3];

/// 立方体的 6 个四面体. 角点编号的三个二进制位依次为 `w`, `h`, `z` 方向的偏移.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 1, 5, 7],
    [0, 2, 3, 7],
    [0, 2, 6, 7],
    [0, 4, 5, 7],
    [0, 4, 6, 7],
];

#[inline]
fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn mean(points: &[Point3]) -> Point3 {
    let n = points.len() as f64;
    let s = points.iter().fold([0.0; 3], |acc, p| [acc[0] + p[0], acc[1] + p[1], acc[2] + p[2]]);
    [s[0] / n, s[1] / n, s[2] / n]
}

/// 三角网格.
#[derive(Debug, Clone, Default)]
pub struct TriMesh {
    triangles: Vec<Triangle>,
}

impl TriMesh {
    /// 所有三角形.
    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// 三角形个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    /// 是否没有任何三角形.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// 封闭曲面包围的体积 (立方毫米).
    pub fn enclosed_volume(&self) -> f64 {
        self.triangles
            .iter()
            .map(|&[a, b, c]| dot(a, cross(b, c)))
            .sum::<f64>()
            / 6.0
    }

    /// 表面积 (平方毫米).
    pub fn surface_area(&self) -> f64 {
        self.triangles
            .iter()
            .map(|&[a, b, c]| {
                let n = cross(sub(b, a), sub(c, a));
                0.5 * dot(n, n).sqrt()
            })
            .sum()
    }

    /// 包围盒 `(min, max)`. 空网格返回 `None`.
    pub fn bounds(&self) -> Option<(Point3, Point3)> {
        let mut it = self.triangles.iter().flatten();
        let first = *it.next()?;
        Some(it.fold((first, first), |(lo, hi), p| {
            (
                [lo[0].min(p[0]), lo[1].min(p[1]), lo[2].min(p[2])],
                [hi[0].max(p[0]), hi[1].max(p[1]), hi[2].max(p[2])],
            )
        }))
    }

    /// 以二进制 STL 格式写入 `path`.
    pub fn write_stl<P: AsRef<Path>>(&self, path: P) -> SegResult<()> {
        let triangles: Vec<stl_io::Triangle> = self
            .triangles
            .iter()
            .map(|&[a, b, c]| {
                let n = cross(sub(b, a), sub(c, a));
                let len = dot(n, n).sqrt();
                let n = if len > 0.0 {
                    [n[0] / len, n[1] / len, n[2] / len]
                } else {
                    [0.0, 0.0, 1.0]
                };
                let f = |p: Point3| [p[0] as f32, p[1] as f32, p[2] as f32];
                stl_io::Triangle {
                    normal: stl_io::Normal::new(f(n)),
                    vertices: [
                        stl_io::Vertex::new(f(a)),
                        stl_io::Vertex::new(f(b)),
                        stl_io::Vertex::new(f(c)),
                    ],
                }
            })
            .collect();
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| InputError::write_failed(path, e))?;
        stl_io::write_stl(&mut BufWriter::new(file), triangles.iter())
            .map_err(|e| InputError::write_failed(path, e))?;
        debug!("wrote {} triangles to {}", triangles.len(), path.display());
        Ok(())
    }
}

/// 一个四面体内的等值面片. `values` 为四个角点的值减去等值, 负为内部.
fn polygonize_tetrahedron(points: [Point3; 4], values: [f64; 4], out: &mut Vec<Triangle>) {
    let inside: Vec<usize> = (0..4).filter(|&i| values[i] < 0.0).collect();
    if inside.is_empty() || inside.len() == 4 {
        return;
    }
    let outside: Vec<usize> = (0..4).filter(|&i| values[i] >= 0.0).collect();
    let cut = |i: usize, o: usize| {
        let t = values[i] / (values[i] - values[o]);
        let d = sub(points[o], points[i]);
        [
            points[i][0] + t * d[0],
            points[i][1] + t * d[1],
            points[i][2] + t * d[2],
        ]
    };
    let outward = sub(
        mean(&outside.iter().map(|&o| points[o]).collect::<Vec<_>>()),
        mean(&inside.iter().map(|&i| points[i]).collect::<Vec<_>>()),
    );
    let mut push = |a: Point3, b: Point3, c: Point3| {
        if dot(cross(sub(b, a), sub(c, a)), outward) >= 0.0 {
            out.push([a, b, c]);
        } else {
            out.push([a, c, b]);
        }
    };

    match (inside.as_slice(), outside.as_slice()) {
        (&[i], &[o0, o1, o2]) => push(cut(i, o0), cut(i, o1), cut(i, o2)),
        (&[i0, i1, i2], &[o]) => push(cut(i0, o), cut(i1, o), cut(i2, o)),
        (&[i0, i1], &[o0, o1]) => {
            // 四边形 p0-p1-p2-p3, 沿 p0-p2 切开.
            let p0 = cut(i0, o0);
            let p1 = cut(i0, o1);
            let p2 = cut(i1, o1);
            let p3 = cut(i1, o0);
            push(p0, p1, p2);
            push(p0, p2, p3);
        }
        _ => {}
    }
}

/// 提取 `field` 在 `iso` 处的等值面. 小于 `iso` 的体素为内部.
pub fn extract_isosurface(field: &Volume<f32>, iso: f64) -> TriMesh {
    let grid = field.grid();
    let data = field.data();
    let (nz, nh, nw) = field.shape();
    // 网格外部视为外部.
    let value = |z: i64, h: i64, w: i64| -> f64 {
        let inside_grid = z >= 0 && h >= 0 && w >= 0 && (z as usize) < nz && (h as usize) < nh && (w as usize) < nw;
        if inside_grid {
            f64::from(data[(z as usize, h as usize, w as usize)]) - iso
        } else {
            1.0
        }
    };

    let slab = |z: i64| -> Vec<Triangle> {
        let mut out = Vec::new();
        for (h, w) in iproduct!(-1..nh as i64, -1..nw as i64) {
            let mut values = [0.0; 8];
            let mut any_in = false;
            let mut any_out = false;
            for (k, v) in values.iter_mut().enumerate() {
                let (dz, dh, dw) = ((k >> 2 & 1) as i64, (k >> 1 & 1) as i64, (k & 1) as i64);
                *v = value(z + dz, h + dh, w + dw);
                if *v < 0.0 {
                    any_in = true;
                } else {
                    any_out = true;
                }
            }
            if !(any_in && any_out) {
                continue;
            }
            let corner = |k: usize| {
                let (dz, dh, dw) = ((k >> 2 & 1) as i64, (k >> 1 & 1) as i64, (k & 1) as i64);
                grid_point(grid, z + dz, h + dh, w + dw)
            };
            for tet in TETRAHEDRA {
                polygonize_tetrahedron(tet.map(corner), tet.map(|k| values[k]), &mut out);
            }
        }
        out
    };

    let zs = -1..nz as i64;
    #[cfg(feature = "rayon")]
    let slabs: Vec<Vec<Triangle>> = zs.into_par_iter().map(slab).collect();
    #[cfg(not(feature = "rayon"))]
    let slabs: Vec<Vec<Triangle>> = zs.map(slab).collect();
    let triangles: Vec<Triangle> = slabs.into_iter().flatten().collect();
    debug!("isosurface at {iso}: {} triangles", triangles.len());
    TriMesh { triangles }
}

#[inline]
fn grid_point(grid: &Grid, z: i64, h: i64, w: i64) -> Point3 {
    grid.continuous_index_to_physical([z as f64, h as f64, w as f64])
}

/// 按体素计数估计体积: 小于 `iso` 的体素个数乘以体素体积.
pub fn voxel_count_volume(field: &Volume<f32>, iso: f64) -> f64 {
    let n = field.data().iter().filter(|&&v| f64::from(v) < iso).count();
    n as f64 * field.voxel()
}

/// 分割结果的体积 (立方毫米): 水平集在 [`SEGMENTATION_ISO_VALUE`] 处等值面包围的体积.
pub fn segmentation_volume(field: &Volume<f32>) -> f64 {
    extract_isosurface(field, SEGMENTATION_ISO_VALUE).enclosed_volume()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SegError;
    use ndarray::Array3;
    use std::f64::consts::PI;

    fn sphere(shape: (usize, usize, usize), spacing: [f64; 3], radius: f64) -> Volume<f32> {
        let grid = Grid::new(shape, spacing).with_origin([-3.0, 7.0, 11.0]);
        let center = grid.continuous_index_to_physical([
            (shape.0 - 1) as f64 / 2.0,
            (shape.1 - 1) as f64 / 2.0,
            (shape.2 - 1) as f64 / 2.0,
        ]);
        let data = Array3::from_shape_fn(shape, |(z, h, w)| {
            let p = grid.index_to_physical((z, h, w));
            let d = sub(p, center);
            (dot(d, d).sqrt() - radius) as f32
        });
        Volume::new(grid, data).unwrap()
    }

    #[test]
    fn test_sphere_volume_and_area() {
        let vol = sphere((24, 24, 24), [1.0; 3], 8.0);
        let mesh = extract_isosurface(&vol, 0.0);
        let v = mesh.enclosed_volume();
        let expected = 4.0 / 3.0 * PI * 512.0;
        assert!((v - expected).abs() / expected < 0.03, "{v} vs {expected}");
        let a = mesh.surface_area();
        let expected = 4.0 * PI * 64.0;
        assert!((a - expected).abs() / expected < 0.08, "{a} vs {expected}");

        let (lo, hi) = mesh.bounds().unwrap();
        assert!((hi[0] - lo[0] - 16.0).abs() < 0.5);
    }

    #[test]
    fn test_anisotropic_spacing() {
        let vol = sphere((14, 30, 30), [2.0, 1.0, 1.0], 9.0);
        let v = extract_isosurface(&vol, 0.0).enclosed_volume();
        let expected = 4.0 / 3.0 * PI * 729.0;
        assert!((v - expected).abs() / expected < 0.04, "{v} vs {expected}");
    }

    #[test]
    fn test_closed_at_grid_border() {
        let vol = Volume::from_elem(Grid::new((10, 10, 10), [1.0; 3]), -1.0_f32);
        let v = extract_isosurface(&vol, 0.0).enclosed_volume();
        assert!((v - 1000.0).abs() / 1000.0 < 0.05, "{v}");
        assert!(v > 0.0);
    }

    #[test]
    fn test_empty() {
        let vol = Volume::from_elem(Grid::new((4, 4, 4), [1.0; 3]), 3.0_f32);
        let mesh = extract_isosurface(&vol, 0.0);
        assert!(mesh.is_empty());
        assert_eq!(mesh.enclosed_volume(), 0.0);
        assert!(mesh.bounds().is_none());
        assert_eq!(voxel_count_volume(&vol, 0.0), 0.0);
    }

    #[test]
    fn test_write_stl() {
        let vol = sphere((8, 8, 8), [1.0; 3], 2.5);
        let mesh = extract_isosurface(&vol, 0.0);
        let dir = std::env::temp_dir().join("lung_nodule_measure_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sphere.stl");
        mesh.write_stl(&path).unwrap();
        let size = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(size, 84 + 50 * mesh.len());

        let missing = dir.join("no_such_dir").join("sphere.stl");
        let err = mesh.write_stl(&missing).unwrap_err();
        assert!(matches!(err, SegError::Input(InputError::Write(_))), "{err}");
        assert!(err.to_string().contains("no_such_dir"));
    }
}
