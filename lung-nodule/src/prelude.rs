//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, Point3};

pub use crate::{CtVolume, CtWindow, Grid, GridAttr, MaskVolume, Region, Volume};
pub use crate::{GeometryError, InputError, SegError, SegResult};

pub use crate::consts::gray::{MASK_BACKGROUND, MASK_FOREGROUND};
pub use crate::consts::{ElemType, SEGMENTATION_ISO_VALUE};

pub use crate::features::{FeatureGenerator, FeatureMap, Generator, MinimumAggregator};
pub use crate::level_set::{
    EvolutionReport, EvolutionStatus, LevelSetConfig, LevelSetField, LevelSetSegmentationModule,
    ModuleState, SeedSet,
};
pub use crate::measure::{extract_isosurface, segmentation_volume, TriMesh};
pub use crate::pipeline::{LesionSegmenter, NoduleKind, RunStatus, SegmenterConfig};
pub use crate::progress::{AbortHandle, Progress, ProgressObserver, Stage};
pub use crate::resample::VolumeResampler;
pub use crate::view::{SliceRenderer, ViewAxis};
