use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::buffer::{MaskImage, PixelBuffer};
use crate::cancel::CancelToken;
use crate::cluster::{ClusterConfig, Clustering, PixelClusterer};
use crate::error::{MaskError, Result};
use crate::mask::{render_clustered, render_mask};
use crate::planner::{ChannelGroup, plan_groups};

/// Position of an output in the run sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// Every pixel replaced by its raw cluster center. Always emitted first.
    Clustered,
    /// Channel mask of the group with this zero-based index.
    Mask(usize),
}

#[derive(Clone, Debug)]
pub struct MaskOutput {
    pub kind: OutputKind,
    pub image: MaskImage,
}

/// What a run learned about the image, without the rendered outputs.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub clustering: Clustering,
    pub groups: Vec<ChannelGroup>,
}

/// A finished run with every output kept in memory.
#[derive(Clone, Debug)]
pub struct PipelineRun {
    pub clustering: Clustering,
    pub groups: Vec<ChannelGroup>,
    /// Clustered preview first, then masks `0..groups.len()` in order.
    pub outputs: Vec<MaskOutput>,
}

impl PipelineRun {
    pub fn masks(&self) -> impl Iterator<Item = (usize, &MaskImage)> {
        self.outputs.iter().filter_map(|o| match o.kind {
            OutputKind::Mask(index) => Some((index, &o.image)),
            OutputKind::Clustered => None,
        })
    }

    pub fn clustered(&self) -> Option<&PixelBuffer> {
        self.outputs
            .iter()
            .find(|o| o.kind == OutputKind::Clustered)
            .map(|o| &o.image)
    }
}

/// File names for the outputs of one source image.
///
/// Masks are `<dir>/<stem>_Mask_<index>.<ext>` and the preview is
/// `<dir>/<stem>_Clustered.<ext>`. By default `dir`, `stem` and `ext` come
/// from the source path, so outputs land next to the input in its format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputNaming {
    dir: PathBuf,
    stem: String,
    extension: String,
}

impl OutputNaming {
    pub fn for_input(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            stem: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "output".to_string()),
            extension: path
                .extension()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "png".to_string()),
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_extension(mut self, extension: impl AsRef<str>) -> Self {
        self.extension = extension.as_ref().trim_start_matches('.').to_string();
        self
    }

    pub fn mask_path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}_Mask_{}.{}", self.stem, index, self.extension))
    }

    pub fn clustered_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_Clustered.{}", self.stem, self.extension))
    }

    pub fn path_for(&self, kind: OutputKind) -> PathBuf {
        match kind {
            OutputKind::Clustered => self.clustered_path(),
            OutputKind::Mask(index) => self.mask_path(index),
        }
    }
}

/// Outcome of [`QuantizationPipeline::write_outputs`].
///
/// Write failures do not stop the run; they are collected in `failures`.
#[derive(Debug)]
pub struct SaveReport {
    pub summary: RunSummary,
    pub written: Vec<(OutputKind, PathBuf)>,
    pub failures: Vec<MaskError>,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// decode → cluster → plan groups → render the preview and every mask.
#[derive(Clone, Debug, Default)]
pub struct QuantizationPipeline {
    clusterer: PixelClusterer,
    cancel: CancelToken,
}

impl QuantizationPipeline {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            clusterer: PixelClusterer::new(config),
            cancel: CancelToken::new(),
        }
    }

    /// Share `cancel` with the caller so the run can be stopped between passes.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        self.clusterer.config()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Hand each output to `sink` as soon as it is rendered.
    ///
    /// The clustered preview comes first, then one mask per channel group in
    /// increasing index order. Each output is dropped after `sink` returns.
    pub fn stream<F>(&self, image: &PixelBuffer, mut sink: F) -> Result<RunSummary>
    where
        F: FnMut(OutputKind, MaskImage),
    {
        info!("Image resolution: {} x {}", image.width(), image.height());
        let clustering = self.clusterer.cluster(image, &self.cancel)?;
        info!("Cluster centers: {}", clustering.palette_hex().join(", "));
        info!("Labelled pixels: {}", clustering.labels.len());

        let groups = plan_groups(clustering.k());

        self.cancel.check()?;
        let preview = render_clustered(image, &clustering.labels, &clustering.centers)?;
        sink(OutputKind::Clustered, preview);

        for group in &groups {
            self.cancel.check()?;
            let mask = render_mask(image, &clustering.labels, group)?;
            debug!("Rendered mask {} for clusters {:?}", group.index(), group.clusters());
            sink(OutputKind::Mask(group.index()), mask);
        }

        Ok(RunSummary { clustering, groups })
    }

    /// Run over an already decoded image and keep every output.
    pub fn run_image(&self, image: &PixelBuffer) -> Result<PipelineRun> {
        let mut outputs = Vec::new();
        let summary = self.stream(image, |kind, image| outputs.push(MaskOutput { kind, image }))?;
        Ok(PipelineRun {
            clustering: summary.clustering,
            groups: summary.groups,
            outputs,
        })
    }

    pub fn run_path(&self, path: impl AsRef<Path>) -> Result<PipelineRun> {
        self.config().validate()?;
        let image = PixelBuffer::open(path)?;
        self.run_image(&image)
    }

    /// Decode `path`, then save every mask (and the preview when asked) under `naming`.
    ///
    /// Decoding, parameter and internal errors abort before anything else is
    /// written. A mask that fails to save is logged and recorded in the report
    /// while the remaining masks are still written.
    pub fn write_outputs(
        &self,
        path: impl AsRef<Path>,
        naming: &OutputNaming,
        include_preview: bool,
    ) -> Result<SaveReport> {
        self.config().validate()?;
        let image = PixelBuffer::open(path)?;

        let mut written = Vec::new();
        let mut failures = Vec::new();
        let summary = self.stream(&image, |kind, output| {
            if kind == OutputKind::Clustered && !include_preview {
                return;
            }
            let target = naming.path_for(kind);
            match output.save(&target) {
                Ok(()) => {
                    info!("Saved {}", target.display());
                    written.push((kind, target));
                }
                Err(e) => {
                    warn!("{e}");
                    failures.push(e);
                }
            }
        })?;

        Ok(SaveReport { summary, written, failures })
    }
}
