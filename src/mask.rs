use palette::Srgb;

use crate::buffer::{BLACK, MaskImage, Pixel, PixelBuffer};
use crate::cluster::LabelMap;
use crate::error::{MaskError, Result};
use crate::planner::ChannelGroup;

/// Paint every pixel through a per-cluster color table.
///
/// Any label without an entry in `table` is an invariant violation.
fn paint(image: &PixelBuffer, labels: &LabelMap, table: &[Pixel]) -> Result<PixelBuffer> {
    if labels.len() != image.len() {
        return Err(MaskError::Internal(format!(
            "label map covers {} pixels but the image has {}",
            labels.len(),
            image.len()
        )));
    }

    let pixels = labels
        .as_slice()
        .iter()
        .enumerate()
        .map(|(pos, &label)| {
            table.get(label).copied().ok_or_else(|| {
                MaskError::Internal(format!(
                    "label {label} at pixel {pos} is outside 0..{}",
                    table.len()
                ))
            })
        })
        .collect::<Result<Vec<Pixel>>>()?;

    PixelBuffer::new(image.width(), image.height(), pixels)
}

/// Render the mask of one channel group.
///
/// Pixels whose cluster belongs to `group` become the pure primary of the
/// cluster's role; every other pixel is black. The label map is only read;
/// the per-group color table is a scratch copy built for this call.
pub fn render_mask(image: &PixelBuffer, labels: &LabelMap, group: &ChannelGroup) -> Result<MaskImage> {
    let mut table = vec![BLACK; labels.k()];
    for (cluster, channel) in group.assignments() {
        let slot = table.get_mut(cluster).ok_or_else(|| {
            MaskError::Internal(format!(
                "group {} names cluster {cluster} but only {} clusters exist",
                group.index(),
                labels.k()
            ))
        })?;
        *slot = channel.color();
    }
    paint(image, labels, &table)
}

/// Reconstruct the image with every pixel replaced by its cluster center.
pub fn render_clustered(
    image: &PixelBuffer,
    labels: &LabelMap,
    centers: &[Srgb<u8>],
) -> Result<PixelBuffer> {
    if centers.len() != labels.k() {
        return Err(MaskError::Internal(format!(
            "{} centers for {} clusters",
            centers.len(),
            labels.k()
        )));
    }
    let table: Vec<Pixel> = centers.iter().map(|c| [c.red, c.green, c.blue]).collect();
    paint(image, labels, &table)
}
