use std::collections::HashSet;

use albedo_to_mask::{
    BLACK, Channel, ClusterConfig, LabelMap, MaskError, PixelBuffer, QuantizationPipeline,
    plan_groups, render_clustered, render_mask,
};
use palette::Srgb;

const PRIMARIES: [[u8; 3]; 4] = [BLACK, [255, 0, 0], [0, 255, 0], [0, 0, 255]];

fn blank(width: u32, height: u32) -> PixelBuffer {
    PixelBuffer::new(width, height, vec![BLACK; (width * height) as usize]).unwrap()
}

/// Vertical stripes, one per color, each two columns wide.
fn stripes(colors: &[[u8; 3]]) -> PixelBuffer {
    PixelBuffer::from_fn(colors.len() as u32 * 2, 3, |x, _| colors[(x / 2) as usize]).unwrap()
}

fn pipeline(k: usize) -> QuantizationPipeline {
    QuantizationPipeline::new(ClusterConfig { k, seed: 3, ..ClusterConfig::default() })
}

#[test]
fn group_members_get_their_role_color() {
    let image = blank(5, 1);
    let labels = LabelMap::new(vec![0, 1, 2, 3, 4], 5).unwrap();
    let groups = plan_groups(5);

    let first = render_mask(&image, &labels, &groups[0]).unwrap();
    assert_eq!(
        first.pixels(),
        &[[255, 0, 0], [0, 255, 0], [0, 0, 255], BLACK, BLACK]
    );

    let second = render_mask(&image, &labels, &groups[1]).unwrap();
    assert_eq!(
        second.pixels(),
        &[BLACK, BLACK, BLACK, [255, 0, 0], [0, 255, 0]]
    );
    assert_eq!((second.width(), second.height()), (5, 1));
}

#[test]
fn rendering_does_not_touch_the_label_map() {
    let image = blank(4, 2);
    let labels = LabelMap::new(vec![0, 1, 2, 3, 3, 2, 1, 0], 4).unwrap();
    let before = labels.clone();
    for group in plan_groups(4) {
        render_mask(&image, &labels, &group).unwrap();
    }
    assert_eq!(labels, before);
}

#[test]
fn masks_only_contain_black_or_primaries() {
    let image = blank(9, 7);
    for k in 1..=9 {
        let labels: Vec<usize> = (0..63).map(|i| (i * 5 + i / 7) % k).collect();
        let labels = LabelMap::new(labels, k).unwrap();
        for group in plan_groups(k) {
            let mask = render_mask(&image, &labels, &group).unwrap();
            assert!(mask.pixels().iter().all(|p| PRIMARIES.contains(p)), "k = {k}");
        }
    }
}

#[test]
fn group_naming_unknown_cluster_is_internal_error() {
    let image = blank(3, 1);
    let labels = LabelMap::new(vec![0, 1, 2], 3).unwrap();
    let foreign = &plan_groups(6)[1];
    let err = render_mask(&image, &labels, foreign).unwrap_err();
    assert!(matches!(err, MaskError::Internal(_)));
}

#[test]
fn out_of_range_labels_are_internal_errors() {
    let err = LabelMap::new(vec![0, 3, 1], 3).unwrap_err();
    assert!(matches!(err, MaskError::Internal(_)));
}

#[test]
fn label_count_must_match_image() {
    let image = blank(2, 2);
    let labels = LabelMap::new(vec![0, 0, 0], 1).unwrap();
    let err = render_mask(&image, &labels, &plan_groups(1)[0]).unwrap_err();
    assert!(matches!(err, MaskError::Internal(_)));
}

#[test]
fn clustered_preview_uses_center_colors() {
    let image = blank(3, 1);
    let labels = LabelMap::new(vec![1, 0, 1], 2).unwrap();
    let centers = vec![Srgb::new(10u8, 20, 30), Srgb::new(200u8, 100, 50)];
    let preview = render_clustered(&image, &labels, &centers).unwrap();
    assert_eq!(preview.pixels(), &[[200, 100, 50], [10, 20, 30], [200, 100, 50]]);

    let err = render_clustered(&image, &labels, &centers[..1]).unwrap_err();
    assert!(matches!(err, MaskError::Internal(_)));
}

#[test]
fn three_separable_colors_fill_one_mask_without_black() {
    let image = stripes(&[[200, 40, 40], [40, 200, 40], [40, 40, 200]]);
    let run = pipeline(3).run_image(&image).unwrap();
    let masks: Vec<_> = run.masks().collect();
    assert_eq!(masks.len(), 1);

    let (index, mask) = masks[0];
    assert_eq!(index, 0);
    assert!(mask.pixels().iter().all(|p| *p != BLACK));

    // Each stripe is one uniform primary and the three stripes differ.
    let mut seen = HashSet::new();
    for stripe in 0..3u32 {
        let color = mask.get(stripe * 2, 0).unwrap();
        for x in stripe * 2..stripe * 2 + 2 {
            for y in 0..3 {
                assert_eq!(mask.get(x, y), Some(color));
            }
        }
        seen.insert(color);
    }
    let expected: HashSet<[u8; 3]> = Channel::ALL.iter().map(|c| c.color()).collect();
    assert_eq!(seen, expected);
}

#[test]
fn fourth_cluster_lands_alone_in_red() {
    let image = stripes(&[[250, 10, 10], [10, 250, 10], [10, 10, 250], [128, 128, 128]]);
    let run = pipeline(4).run_image(&image).unwrap();
    let masks: Vec<_> = run.masks().collect();
    assert_eq!(masks.len(), 2);

    let (index, second) = masks[1];
    assert_eq!(index, 1);
    let red_pixels = second.pixels().iter().filter(|p| **p == [255, 0, 0]).count();
    assert!(second.pixels().iter().all(|p| *p == BLACK || *p == [255, 0, 0]));
    assert_eq!(red_pixels, run.clustering.labels.counts()[3]);
    assert_eq!(red_pixels, 6);
}

#[test]
fn single_cluster_mask_is_all_red() {
    let image = stripes(&[[90, 60, 30], [95, 65, 35]]);
    let run = pipeline(1).run_image(&image).unwrap();
    let masks: Vec<_> = run.masks().collect();
    assert_eq!(masks.len(), 1);
    assert!(masks[0].1.pixels().iter().all(|p| *p == [255, 0, 0]));
}
