//! 命令行参数.

use clap::Parser;
use lung_nodule::Point3;
use std::path::PathBuf;

/// 基于水平集的三维肺结节分割与体积测量.
#[derive(Parser, Debug)]
#[command(author, version)]
pub struct Args {
    /// 输入体数据 (NIfTI).
    #[arg(long = "input-image", conflicts_with = "input_dicom")]
    pub input_image: Option<PathBuf>,

    /// 输入 DICOM 序列目录.
    #[arg(long = "input-dicom", required_unless_present = "input_image")]
    pub input_dicom: Option<PathBuf>,

    /// 忽略输入的方向矩阵.
    #[arg(long = "ignore-direction")]
    pub ignore_direction: bool,

    /// 输出水平集 (NIfTI).
    #[arg(long = "output-image")]
    pub output_image: Option<PathBuf>,

    /// 输出分割表面 (STL).
    #[arg(long = "output-mesh")]
    pub output_mesh: Option<PathBuf>,

    /// 输出裁剪后的 ROI (NIfTI).
    #[arg(long = "output-roi")]
    pub output_roi: Option<PathBuf>,

    /// 种子点物理坐标 `X,Y,Z`, 可重复.
    #[arg(long = "seeds", required = true, value_parser = parse_point)]
    pub seeds: Vec<Point3>,

    /// ROI 的物理边界 `X0 X1 Y0 Y1 Z0 Z1`.
    #[arg(long = "roi", num_args = 6, allow_negative_numbers = true)]
    pub roi: Option<Vec<f64>>,

    /// 血管性特征的高斯尺度 (毫米).
    #[arg(long = "sigma", value_parser = positive)]
    pub sigma: Option<f64>,

    /// 按部分实性结节分割.
    #[arg(long = "part-solid")]
    pub part_solid: bool,

    /// 分割前超采样为各向同性体素.
    #[arg(long = "supersample")]
    pub supersample: bool,

    /// 各向同性体素尺寸 (毫米). 隐含 `--supersample`.
    /// 未给出时取 x 与 z 方向分辨率的算术平均.
    #[arg(long = "isotropic-spacing", value_parser = positive)]
    pub isotropic_spacing: Option<f64>,

    /// 未超采样时, 细分过厚的层.
    #[arg(long = "resample-thick-slices")]
    pub resample_thick_slices: bool,

    /// 厚层细分的各向异性阈值. 隐含 `--resample-thick-slices`.
    #[arg(long = "anisotropy-threshold", value_parser = positive)]
    pub anisotropy_threshold: Option<f64>,

    /// 加入 Canny 边缘特征.
    #[arg(long = "canny-edges")]
    pub canny_edges: bool,

    /// 计算并打印表面网格体积, 写出网格与截图.
    #[arg(long = "visualize")]
    pub visualize: bool,

    /// 截图输出目录.
    #[arg(long = "screenshot")]
    pub screenshot: Option<PathBuf>,

    /// 特征图 (`.npy`) 输出目录.
    #[arg(long = "write-features")]
    pub write_features: Option<PathBuf>,

    /// 输出调试日志.
    #[arg(long, short)]
    pub verbose: bool,
}

impl Args {
    /// ROI 的两个角点.
    pub fn roi_corners(&self) -> Option<(Point3, Point3)> {
        let r = self.roi.as_deref()?;
        Some(([r[0], r[2], r[4]], [r[1], r[3], r[5]]))
    }
}

fn parse_point(s: &str) -> Result<Point3, String> {
    let v = s
        .split(',')
        .map(|t| t.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| format!("`{s}` is not a legal point"))?;
    match v[..] {
        [x, y, z] if v.iter().all(|c| c.is_finite()) => Ok([x, y, z]),
        _ => Err(format!("`{s}` should be given as `X,Y,Z`")),
    }
}

fn positive(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v > 0.0 && v.is_finite() => Ok(v),
        _ => Err(format!("`{s}` is not a positive number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("1,-2.5, 3"), Ok([1.0, -2.5, 3.0]));
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("a,b,c").is_err());
        assert!(parse_point("1,2,inf").is_err());
    }

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "segmenter",
            "--input-image",
            "ct.nii.gz",
            "--seeds",
            "1,2,3",
            "--seeds",
            "4,5,6",
            "--roi",
            "-10",
            "10",
            "-20",
            "20",
            "0",
            "30",
            "--part-solid",
        ])
        .unwrap();
        assert_eq!(args.seeds, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(args.roi_corners(), Some(([-10.0, -20.0, 0.0], [10.0, 20.0, 30.0])));
        assert!(args.part_solid);
        assert!(!args.supersample);
    }

    #[test]
    fn test_missing_input() {
        assert!(Args::try_parse_from(["segmenter", "--seeds", "1,2,3"]).is_err());
        assert!(Args::try_parse_from(["segmenter", "--input-dicom", "d"]).is_err());
        assert!(Args::try_parse_from([
            "segmenter",
            "--input-dicom",
            "d",
            "--seeds",
            "1,2,3",
            "--sigma",
            "-1"
        ])
        .is_err());
    }
}
