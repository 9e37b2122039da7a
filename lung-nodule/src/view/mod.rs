//! 截图导出.
//!
//! 过焦点取三个正交切片 (横断面, 冠状面, 矢状面), 用肺窗映射为灰度,
//! 叠加分割轮廓后保存为 JPEG.

use std::path::{Path, PathBuf};

use image::{imageops, Rgb, RgbImage};
use log::info;
use ndarray::Array2;

use crate::consts::SEGMENTATION_ISO_VALUE;
use crate::{CtVolume, CtWindow, GridAttr, Idx3d, InputError, Point3, SegError, SegResult, Volume};

/// 轮廓颜色.
pub const CONTOUR_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// 切片方向.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ViewAxis {
    /// 横断面, 固定 `z`.
    Axial,

    /// 冠状面, 固定 `h`.
    Coronal,

    /// 矢状面, 固定 `w`.
    Sagittal,
}

impl ViewAxis {
    /// 全部三个方向.
    pub const ALL: [ViewAxis; 3] = [Self::Axial, Self::Coronal, Self::Sagittal];

    /// 截图文件名.
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Axial => "axial.jpg",
            Self::Coronal => "coronal.jpg",
            Self::Sagittal => "sagittal.jpg",
        }
    }

    /// 被固定的索引轴.
    const fn axis(self) -> usize {
        match self {
            Self::Axial => 0,
            Self::Coronal => 1,
            Self::Sagittal => 2,
        }
    }
}

/// 切片上第 `(row, col)` 个像素对应的三维索引. 冠状面和矢状面把头侧 (`z` 大) 放在上方.
fn slice_index(axis: ViewAxis, fixed: usize, nz: usize, (row, col): (usize, usize)) -> Idx3d {
    match axis {
        ViewAxis::Axial => (fixed, row, col),
        ViewAxis::Coronal => (nz - 1 - row, fixed, col),
        ViewAxis::Sagittal => (nz - 1 - row, col, fixed),
    }
}

/// 截图渲染器.
#[derive(Debug, Clone, Copy)]
pub struct SliceRenderer {
    window: CtWindow,
    iso: f64,
}

impl Default for SliceRenderer {
    fn default() -> Self {
        Self {
            window: CtWindow::from_lung_visual(),
            iso: SEGMENTATION_ISO_VALUE,
        }
    }
}

impl SliceRenderer {
    /// 使用指定的 CT 窗.
    pub fn with_window(mut self, window: CtWindow) -> Self {
        self.window = window;
        self
    }

    /// 渲染一个方向的切片. `phi` 可以位于与 `ct` 不同的网格上 (例如裁剪并重采样后).
    pub fn render(
        &self,
        ct: &CtVolume,
        phi: &Volume<f32>,
        axis: ViewAxis,
        focus: Point3,
    ) -> SegResult<RgbImage> {
        let focus_idx = ct.grid().physical_to_valid_index(focus).ok_or_else(|| {
            SegError::InvalidInput(format!("focus point {focus:?} lies outside the image"))
        })?;
        let fixed = [focus_idx.0, focus_idx.1, focus_idx.2][axis.axis()];
        let (nz, nh, nw) = ct.shape();
        let (rows, cols) = match axis {
            ViewAxis::Axial => (nh, nw),
            ViewAxis::Coronal => (nz, nw),
            ViewAxis::Sagittal => (nz, nh),
        };

        let hu = Array2::from_shape_fn((rows, cols), |p| ct[slice_index(axis, fixed, nz, p)]);
        let gray = self.window.apply(hu.view());
        let inside = Array2::from_shape_fn((rows, cols), |p| {
            let pos = ct.grid().index_to_physical(slice_index(axis, fixed, nz, p));
            phi.grid()
                .physical_to_valid_index(pos)
                .is_some_and(|idx| f64::from(phi[idx]) < self.iso)
        });

        let mut img = RgbImage::new(cols as u32, rows as u32);
        for ((r, c), &g) in gray.indexed_iter() {
            let on_contour = inside[(r, c)]
                && [(-1_isize, 0_isize), (1, 0), (0, -1), (0, 1)].iter().any(|&(dr, dc)| {
                    let (nr, nc) = (r as isize + dr, c as isize + dc);
                    nr < 0
                        || nc < 0
                        || nr >= rows as isize
                        || nc >= cols as isize
                        || !inside[(nr as usize, nc as usize)]
                });
            let pixel = if on_contour { CONTOUR_COLOR } else { Rgb([g, g, g]) };
            img.put_pixel(c as u32, r as u32, pixel);
        }

        // 按像素物理尺寸拉伸行方向.
        let [sz, sh, sw] = ct.pix_dim();
        let (row_mm, col_mm) = match axis {
            ViewAxis::Axial => (sh, sw),
            ViewAxis::Coronal => (sz, sw),
            ViewAxis::Sagittal => (sz, sh),
        };
        let height = ((rows as f64 * row_mm / col_mm).round() as u32).max(1);
        if height != rows as u32 {
            img = imageops::resize(&img, cols as u32, height, imageops::FilterType::Nearest);
        }
        Ok(img)
    }

    /// 把三个方向的截图写入 `dir`, 返回写入的文件路径.
    pub fn save_all<P: AsRef<Path>>(
        &self,
        ct: &CtVolume,
        phi: &Volume<f32>,
        focus: Point3,
        dir: P,
    ) -> SegResult<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| InputError::write_failed(dir, e))?;
        ViewAxis::ALL
            .iter()
            .map(|&axis| {
                let path = dir.join(axis.file_name());
                self.render(ct, phi, axis, focus)?.save(&path)?;
                info!("screenshot saved to {}", path.display());
                Ok(path)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Grid;
    use ndarray::Array3;

    /// 沿 `axis` 方向的切片个数.
    fn slice_count<G: GridAttr>(volume: &G, axis: ViewAxis) -> usize {
        let (z, h, w) = volume.shape();
        [z, h, w][axis.axis()]
    }

    fn fixture() -> (CtVolume, Volume<f32>) {
        let grid = Grid::new((10, 12, 12), [2.0, 1.0, 1.0]);
        let ct = Volume::from_elem(grid.clone(), -900.0_f32);
        // 水平集在 z = 8..12 mm 的 (h, w) = 4..8 方块内为负.
        let phi = Array3::from_shape_fn((10, 12, 12), |(z, h, w)| {
            if (4..6).contains(&z) && (4..8).contains(&h) && (4..8).contains(&w) {
                -2.0
            } else {
                2.0
            }
        });
        (ct, Volume::new(grid, phi).unwrap())
    }

    #[test]
    fn test_axial_contour() {
        let (ct, phi) = fixture();
        let img = SliceRenderer::default()
            .render(&ct, &phi, ViewAxis::Axial, [5.0, 5.0, 8.0])
            .unwrap();
        assert_eq!(img.dimensions(), (12, 12));
        // 边界为红色, 方块内部与外部为灰色.
        assert_eq!(*img.get_pixel(4, 4), CONTOUR_COLOR);
        assert_eq!(*img.get_pixel(7, 5), CONTOUR_COLOR);
        let inner = *img.get_pixel(5, 5);
        assert_eq!(inner[0], inner[1]);
        assert_eq!(*img.get_pixel(0, 0), inner);
    }

    #[test]
    fn test_window() {
        let (ct, phi) = fixture();
        let img = SliceRenderer::default()
            .with_window(CtWindow::from_mediastinal_visual())
            .render(&ct, &phi, ViewAxis::Axial, [5.0, 5.0, 8.0])
            .unwrap();
        // -900 HU 在纵隔窗下为黑色.
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_coronal_is_stretched() {
        let (ct, phi) = fixture();
        let img = SliceRenderer::default()
            .render(&ct, &phi, ViewAxis::Coronal, [5.0, 5.0, 8.0])
            .unwrap();
        // 10 个切片 * 2 mm.
        assert_eq!(img.dimensions(), (12, 20));
        assert_eq!(slice_count(&ct, ViewAxis::Coronal), 12);
    }

    #[test]
    fn test_focus_outside() {
        let (ct, phi) = fixture();
        let err = SliceRenderer::default()
            .render(&ct, &phi, ViewAxis::Axial, [100.0, 0.0, 0.0])
            .unwrap_err();
        assert!(matches!(err, SegError::InvalidInput(_)));
    }

    #[test]
    fn test_save_all() {
        let (ct, phi) = fixture();
        let dir = std::env::temp_dir().join("lung_nodule_view_test");
        let paths = SliceRenderer::default()
            .save_all(&ct, &phi, [5.0, 5.0, 8.0], &dir)
            .unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.exists()));
        assert!(paths[0].ends_with("axial.jpg"));
    }
}
