//! 程序运行函数.

use crate::args::Args;
use log::{info, warn};
use lung_nodule::features::EdgeConfig;
use lung_nodule::io::{read_volume, write_volume};
use lung_nodule::prelude::*;
use std::process::ExitCode;
use utils::loader;

/// 运行结果, 对应进程退出码.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 分割完成. 退出码 0.
    Success,
    /// 读写或分割失败. 退出码 1.
    Failed,
    /// 分割被中止. 退出码 2.
    Cancelled,
}

impl From<Outcome> for ExitCode {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Failed => ExitCode::from(1),
            Outcome::Cancelled => ExitCode::from(2),
        }
    }
}

/// 读入 CT 图像.
fn load_input(args: &Args) -> SegResult<CtVolume> {
    match (&args.input_image, &args.input_dicom) {
        (Some(path), _) => read_volume(loader::resolve_input(path), args.ignore_direction),
        (None, Some(dir)) => {
            utils::dicom::read_series_dir(loader::resolve_input(dir), args.ignore_direction)
        }
        (None, None) => Err(SegError::InvalidInput("no input image given".into())),
    }
}

/// 超采样但未指定分辨率时使用的分辨率: x 与 z 方向的算术平均.
fn auto_isotropic_spacing(input: &CtVolume) -> f64 {
    let [sz, _, sx] = input.pix_dim();
    (sx + sz) / 2.0
}

/// 由命令行参数构造流水线配置.
fn build_config(args: &Args) -> SegmenterConfig {
    let mut config = if args.part_solid {
        SegmenterConfig::part_solid()
    } else {
        SegmenterConfig::solid()
    };
    config.sigma = args.sigma;
    config.supersample = args.supersample || args.isotropic_spacing.is_some();
    if let Some(spacing) = args.isotropic_spacing {
        config.isotropic_spacing = spacing;
    }
    config.resample_thick_slices = args.resample_thick_slices || args.anisotropy_threshold.is_some();
    if let Some(threshold) = args.anisotropy_threshold {
        config.anisotropy_threshold = threshold;
    }
    if args.canny_edges {
        config.edge = Some(EdgeConfig::default());
    }
    config.feature_dump_dir = args.write_features.clone();
    config
}

/// 实际运行.
pub fn run(args: &Args) -> SegResult<Outcome> {
    let input = load_input(args)?;
    info!(
        "input: shape {:?}, spacing {:?}, origin {:?}",
        input.shape(),
        input.pix_dim(),
        input.grid().origin()
    );

    let mut config = build_config(args);
    if config.supersample && config.isotropic_spacing == 0.0 {
        config.isotropic_spacing = auto_isotropic_spacing(&input);
        info!("isotropic spacing: {:.3} mm", config.isotropic_spacing);
    }
    let mut seg = LesionSegmenter::new(config);
    seg.set_input(input)?;
    seg.set_seeds(args.seeds.clone())?;
    let roi = match args.roi_corners() {
        Some((p1, p2)) => Some(seg.set_region_from_corners(p1, p2)?),
        None => None,
    };
    seg.set_progress_observer({
        let mut last = None;
        move |p: &Progress| {
            if last != Some(p.stage) {
                info!("{}", p.stage);
                last = Some(p.stage);
            }
        }
    });

    let status = seg.update()?;
    if status == RunStatus::Cancelled {
        warn!("segmentation cancelled");
        return Ok(Outcome::Cancelled);
    }
    let (Some(input), Some(phi)) = (seg.input(), seg.output()) else {
        return Err(SegError::InvalidInput("segmentation produced no output".into()));
    };

    if let Some(path) = &args.output_image {
        write_volume(phi, path)?;
        info!("level set written to {}", path.display());
    }
    if let Some(path) = &args.output_roi {
        match roi {
            Some(roi) => {
                write_volume(&input.crop(&roi)?, path)?;
                info!("region of interest written to {}", path.display());
            }
            None => warn!("`--output-roi` ignored: no `--roi` given"),
        }
    }

    let mesh = (args.visualize || args.output_mesh.is_some())
        .then(|| extract_isosurface(phi, SEGMENTATION_ISO_VALUE));
    if let (Some(mesh), Some(path)) = (&mesh, &args.output_mesh) {
        mesh.write_stl(path)?;
        info!("mesh with {} triangles written to {}", mesh.len(), path.display());
    }
    if let Some(dir) = &args.screenshot {
        SliceRenderer::default().save_all(input, phi, args.seeds[0], dir)?;
    } else if args.visualize {
        warn!("no `--screenshot` directory given, screenshots skipped");
    }

    utils::sep();
    println!("Status: {status} ({})", seg.status_message());
    if let Some(report) = seg.report() {
        println!(
            "Iterations: {}, last RMS change: {:.6}",
            report.iterations, report.rms_change
        );
    }
    println!("Volume: {:.3} mm^3", segmentation_volume(phi));
    if let Some(mesh) = &mesh {
        println!(
            "Mesh: {} triangles, enclosed volume {:.3} mm^3, surface area {:.3} mm^2",
            mesh.len(),
            mesh.enclosed_volume(),
            mesh.surface_area()
        );
    }
    utils::sep();
    Ok(Outcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use ndarray::Array3;

    fn write_phantom(path: &std::path::Path) {
        let grid = Grid::new((24, 24, 24), [1.0; 3]);
        let data = Array3::from_shape_fn((24, 24, 24), |(z, h, w)| {
            let d2 = [z, h, w].iter().map(|&v| (v as f64 - 12.0).powi(2)).sum::<f64>();
            if d2 <= 25.0 {
                40.0
            } else {
                -950.0
            }
        });
        write_volume(&Volume::new(grid, data).unwrap(), path).unwrap();
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitCode::from(Outcome::Success), ExitCode::SUCCESS);
        assert_eq!(ExitCode::from(Outcome::Cancelled), ExitCode::from(2));
    }

    #[test]
    fn test_build_config() {
        let args = Args::try_parse_from([
            "segmenter",
            "--input-dicom",
            "d",
            "--seeds",
            "0,0,0",
            "--isotropic-spacing",
            "0.5",
            "--part-solid",
        ])
        .unwrap();
        let config = build_config(&args);
        assert!(config.supersample);
        assert_eq!(config.isotropic_spacing, 0.5);
        assert_eq!(config.kind, NoduleKind::PartSolid);
        assert!(!config.resample_thick_slices);
        assert!(config.edge.is_none());

        let args = Args::try_parse_from([
            "segmenter",
            "--input-dicom",
            "d",
            "--seeds",
            "0,0,0",
            "--anisotropy-threshold",
            "1.5",
            "--canny-edges",
        ])
        .unwrap();
        let config = build_config(&args);
        assert!(!config.supersample);
        assert!(config.resample_thick_slices);
        assert_eq!(config.anisotropy_threshold, 1.5);
        assert_eq!(config.edge, Some(EdgeConfig::default()));
    }

    #[test]
    fn test_auto_isotropic_spacing() {
        let ct = Volume::from_elem(Grid::new((2, 2, 2), [2.5, 0.7, 0.7]), -1000.0_f32);
        assert!((auto_isotropic_spacing(&ct) - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_run_end_to_end() {
        let dir = std::env::temp_dir().join("lung_nodule_segmenter_test");
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("ct.nii");
        write_phantom(&input);
        let mesh = dir.join("nodule.stl");
        let out = dir.join("phi.nii");
        let roi = dir.join("roi.nii");

        let path = |p: &std::path::Path| p.to_string_lossy().into_owned();
        let args = Args::try_parse_from([
            "segmenter".to_string(),
            "--input-image".into(),
            path(&input),
            "--seeds".into(),
            "12,12,12".into(),
            "--roi".into(),
            "2".into(),
            "22".into(),
            "2".into(),
            "22".into(),
            "2".into(),
            "22".into(),
            "--output-image".into(),
            path(&out),
            "--output-mesh".into(),
            path(&mesh),
            "--output-roi".into(),
            path(&roi),
        ])
        .unwrap();
        assert_eq!(run(&args).unwrap(), Outcome::Success);
        assert!(mesh.exists() && out.exists());
        assert_eq!(read_volume(&roi, false).unwrap().shape(), (20, 20, 20));
    }

    #[test]
    fn test_missing_file() {
        let args = Args::try_parse_from([
            "segmenter",
            "--input-image",
            "/no/such/file.nii",
            "--seeds",
            "0,0,0",
        ])
        .unwrap();
        assert!(matches!(run(&args), Err(SegError::Input(_))));
    }
}
