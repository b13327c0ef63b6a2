//! Region location on simulated panel frames

use crabfocus::config::LocatorConfig;
use crabfocus::locator::{center_crop_rect, RegionLocator};
use crabfocus::testing::SimulatedScene;
use crabfocus::types::BoundingBox;
use image::{Rgb, RgbImage};

#[test]
fn test_center_survives_heavy_blur() {
    let frame = SimulatedScene::default().render(30);
    let (cx, cy) = RegionLocator::default().locate_center(&frame);
    assert!((cx as i64 - 160).abs() <= 4, "cx = {}", cx);
    assert!((cy as i64 - 120).abs() <= 4, "cy = {}", cy);
}

#[test]
fn test_center_follows_offset_panel() {
    let mut frame = RgbImage::from_pixel(320, 240, Rgb([10, 10, 10]));
    let panel = SimulatedScene {
        width: 128,
        height: 64,
        panel_width: 100,
        panel_height: 50,
        ..SimulatedScene::default()
    }
    .render_sharp();
    image::imageops::replace(&mut frame, &panel, 180, 150);

    let (cx, cy) = RegionLocator::default().locate_center(&frame);
    assert!((230..=255).contains(&cx), "cx = {}", cx);
    assert!((170..=195).contains(&cy), "cy = {}", cy);
}

#[test]
fn test_bbox_on_tilted_panel() {
    let frame = SimulatedScene {
        tilt_deg: 6.0,
        ..SimulatedScene::default()
    }
    .render(142);
    let bbox = RegionLocator::default().locate_bbox(&frame).unwrap();
    let aspect = bbox.aspect_ratio();
    assert!((1.3..=3.0).contains(&aspect), "aspect = {}", aspect);
    assert!(bbox.h > 64);
}

#[test]
fn test_aspect_limits_are_inclusive() {
    // a 100x50 blob dilates to 112x62, just outside 1.8; widen the band to include it
    let mut frame = RgbImage::from_pixel(320, 240, Rgb([10, 10, 10]));
    for y in 95..145 {
        for x in 110..210 {
            frame.put_pixel(x, y, Rgb([30, 60, 220]));
        }
    }
    let strict = RegionLocator::new(LocatorConfig {
        max_aspect: 1.8,
        ..LocatorConfig::default()
    });
    assert!(strict.locate_bbox(&frame).is_none());

    let exact = RegionLocator::new(LocatorConfig {
        max_aspect: 112.0 / 62.0,
        ..LocatorConfig::default()
    });
    assert_eq!(exact.locate_bbox(&frame), Some(BoundingBox::new(104, 89, 112, 62)));
}

#[test]
fn test_edge_touching_panel_is_flagged() {
    let mut frame = RgbImage::from_pixel(320, 240, Rgb([10, 10, 10]));
    for y in 80..150 {
        for x in 0..140 {
            frame.put_pixel(x, y, Rgb([30, 60, 220]));
        }
    }
    let locator = RegionLocator::default();
    let bbox = locator.locate_bbox(&frame).unwrap();
    assert!(locator.touches_edge(&bbox, 320, 240));

    let inner = center_crop_rect(320, 240);
    assert!(!locator.touches_edge(&inner, 320, 240));
}

#[test]
fn test_panel_flush_with_top_right_corner() {
    let mut frame = RgbImage::from_pixel(320, 240, Rgb([10, 10, 10]));
    for y in 0..70 {
        for x in 180..320 {
            frame.put_pixel(x, y, Rgb([30, 60, 220]));
        }
    }
    let locator = RegionLocator::default();
    let bbox = locator.locate_bbox(&frame).unwrap();
    assert_eq!(bbox, BoundingBox::new(174, 0, 146, 76));
    assert_eq!(bbox.right(), 320);
    assert!(locator.touches_edge(&bbox, 320, 240));

    assert_eq!(locator.locate_center(&frame), bbox.center());
}
