use image::ImageFormat;
use js_sys::{Array, Object, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;

mod buffer;
mod cancel;
mod cluster;
mod error;
mod mask;
mod pipeline;
mod planner;

pub use buffer::{BLACK, MaskImage, Pixel, PixelBuffer};
pub use cancel::CancelToken;
pub use cluster::{
    ClusterBackend, ClusterConfig, Clustering, DegenerateCluster, LabelMap, PixelClusterer,
};
pub use error::{MaskError, Result};
pub use mask::{render_clustered, render_mask};
pub use pipeline::{
    MaskOutput, OutputKind, OutputNaming, PipelineRun, QuantizationPipeline, RunSummary,
    SaveReport,
};
pub use planner::{Channel, ChannelGroup, plan_groups};

/// PNG-encoded outputs of one run, ready to hand to a browser or write to disk.
#[derive(Clone, Debug)]
pub struct EncodedMasks {
    pub clustered: Vec<u8>,
    /// One PNG per channel group, in mask index order.
    pub masks: Vec<Vec<u8>>,
    /// Cluster centers as `RRGGBB`.
    pub palette: Vec<String>,
}

/// Decode `input`, cluster it and PNG-encode the preview and every mask.
pub fn masks_from_bytes(input: &[u8], config: ClusterConfig) -> Result<EncodedMasks> {
    config.validate()?;
    let image = PixelBuffer::decode(input)?;
    let pipeline = QuantizationPipeline::new(config);

    let mut clustered = Vec::new();
    let mut masks = Vec::new();
    let mut encode_error = None;
    let summary = pipeline.stream(&image, |kind, output| {
        if encode_error.is_some() {
            return;
        }
        match output.encode(ImageFormat::Png) {
            Ok(png) => match kind {
                OutputKind::Clustered => clustered = png,
                OutputKind::Mask(_) => masks.push(png),
            },
            Err(e) => encode_error = Some(e),
        }
    })?;
    if let Some(e) = encode_error {
        return Err(e);
    }

    Ok(EncodedMasks {
        clustered,
        masks,
        palette: summary.clustering.palette_hex(),
    })
}

/// Split an albedo texture into RGB channel masks.
///
/// Steps performed:
/// 1. Run k-means (`k = n_colors`) over the RGB pixels, keeping the best of
///    `attempts` restarts (10 by default).
/// 2. Render a preview with every pixel replaced by its cluster center.
/// 3. Pack clusters three at a time into red, green and blue, one mask per
///    group, everything outside the group black.
///
/// Returns `{ clustered: Uint8Array, masks: Uint8Array[], palette: string[] }`
/// where every image is PNG-encoded.
#[wasm_bindgen]
pub fn albedo_to_masks(
    input: Vec<u8>,
    n_colors: usize,
    seed: Option<u32>,
    attempts: Option<usize>,
) -> std::result::Result<Object, JsValue> {
    let mut config = ClusterConfig::with_k(n_colors);
    if let Some(seed) = seed {
        config.seed = u64::from(seed);
    }
    if let Some(attempts) = attempts {
        config.attempts = attempts;
    }

    let encoded = masks_from_bytes(&input, config).map_err(|e| JsValue::from_str(&e.to_string()))?;

    let masks_js = Array::new();
    for png in &encoded.masks {
        masks_js.push(&Uint8Array::from(png.as_slice()));
    }
    let palette_js = Array::new();
    for hex in &encoded.palette {
        palette_js.push(&JsValue::from_str(hex));
    }

    let result = Object::new();
    Reflect::set(
        &result,
        &JsValue::from_str("clustered"),
        &Uint8Array::from(encoded.clustered.as_slice()),
    )?;
    Reflect::set(&result, &JsValue::from_str("masks"), &masks_js)?;
    Reflect::set(&result, &JsValue::from_str("palette"), &palette_js)?;

    Ok(result)
}
