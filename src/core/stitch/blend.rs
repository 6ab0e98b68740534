//! Quadrant alpha blend, global white balance, and car icon overlay
//! (§4.8.3 – §4.8.5), orchestrated into a single `Stitcher`.

use opencv::core::{Mat, Rect, Scalar, Vector, CV_32FC1, CV_8UC1, CV_8UC3};
use opencv::prelude::*;

use crate::error::Result;
use crate::geometry::{CameraId, CanvasLayout, Quadrant};

use super::luminance::{self, Frames, QuadrantMasks};

/// The four quadrant blend weights, `CV_32FC1`, produced by
/// `weights::weight_and_mask` and persisted (§4.8.1).
pub struct QuadrantWeights {
    pub weights: [Mat; 4],
}

impl QuadrantWeights {
    pub fn get(&self, q: Quadrant) -> &Mat {
        &self.weights[q.channel()]
    }
}

/// Broadcasts a single-channel `[0,1]` weight field to three identical
/// channels so it can be multiplied elementwise against a `CV_8UC3` tile.
fn broadcast3(weight: &Mat) -> opencv::Result<Mat> {
    let mut channels = Vector::new();
    channels.push(weight.clone());
    channels.push(weight.clone());
    channels.push(weight.clone());
    let mut out = Mat::default();
    opencv::core::merge(&channels, &mut out)?;
    Ok(out)
}

/// Blends two same-shaped `CV_8UC3` tiles under weight `g` (`a*g + b*(1-g)`,
/// §4.8.3 step 1), in floating point to avoid intermediate saturation.
fn alpha_blend(a: &Mat, b: &Mat, g3: &Mat) -> opencv::Result<Mat> {
    let mut a_f = Mat::default();
    a.convert_to(&mut a_f, opencv::core::CV_32FC3, 1.0, 0.0)?;
    let mut b_f = Mat::default();
    b.convert_to(&mut b_f, opencv::core::CV_32FC3, 1.0, 0.0)?;

    let mut one_minus_g = Mat::default();
    opencv::core::subtract(
        &Scalar::all(1.0),
        g3,
        &mut one_minus_g,
        &opencv::core::no_array(),
        -1,
    )?;

    let mut a_term = Mat::default();
    opencv::core::multiply(&a_f, g3, &mut a_term, 1.0, -1)?;
    let mut b_term = Mat::default();
    opencv::core::multiply(&b_f, &one_minus_g, &mut b_term, 1.0, -1)?;

    let mut sum = Mat::default();
    opencv::core::add(&a_term, &b_term, &mut sum, &opencv::core::no_array(), -1)?;

    let mut out = Mat::default();
    sum.convert_to(&mut out, CV_8UC3, 1.0, 0.0)?;
    Ok(out)
}

/// Per-channel gray-world white balance over the finished canvas (§4.8.4):
/// equalizes the three channel means to their common average so the seam
/// between quadrant-blended corners and directly-copied middle strips does
/// not carry a visible color cast.
fn white_balance(canvas: &Mat) -> opencv::Result<Mat> {
    let mut channels = Vector::new();
    opencv::core::split(canvas, &mut channels)?;

    let mut means = [0f64; 3];
    for ch in 0..3 {
        means[ch] = opencv::core::mean(&channels.get(ch)?, &opencv::core::no_array())?[0];
    }
    let target = (means[0] + means[1] + means[2]) / 3.0;

    let mut balanced = Vector::new();
    for ch in 0..3 {
        let gain = if means[ch].abs() < 1e-6 {
            1.0
        } else {
            target / means[ch]
        };
        let mut scaled = Mat::default();
        opencv::core::multiply(&channels.get(ch)?, &Scalar::all(gain), &mut scaled, 1.0, CV_8UC1)?;
        balanced.push(scaled);
    }

    let mut out = Mat::default();
    opencv::core::merge(&balanced, &mut out)?;
    Ok(out)
}

/// Pastes `icon`'s non-transparent pixels onto `canvas` at `rect`, using
/// the icon's own non-zero footprint as its mask (§4.8.5; the reference
/// icon has no alpha channel, so "non-black" stands in for "opaque").
fn overlay_car_icon(canvas: &mut Mat, icon: &Mat, rect: Rect) -> opencv::Result<()> {
    let mut mask = Mat::default();
    opencv::imgproc::cvt_color(icon, &mut mask, opencv::imgproc::COLOR_BGR2GRAY, 0)?;
    let mut binary_mask = Mat::default();
    opencv::imgproc::threshold(&mask, &mut binary_mask, 0.0, 255.0, opencv::imgproc::THRESH_BINARY)?;

    let mut roi = Mat::roi(canvas, rect)?;
    icon.copy_to_masked(&mut roi, &binary_mask)?;
    Ok(())
}

/// Holds the offline-computed weights, masks, and the car icon sprite, and
/// turns one four-camera snapshot into a finished birdview frame.
pub struct Stitcher {
    layout: CanvasLayout,
    weights: QuadrantWeights,
    masks: QuadrantMasks,
    car_icon: Mat,
}

impl Stitcher {
    pub fn new(layout: CanvasLayout, weights: QuadrantWeights, masks: QuadrantMasks, car_icon: Mat) -> Self {
        Self {
            layout,
            weights,
            masks,
            car_icon,
        }
    }

    /// Runs luminance balance, quadrant blending, the non-overlap strip
    /// copy, global white balance, and the car icon overlay, in that order
    /// (§4.8's pipeline). Returns `None` if any of the four oriented tiles
    /// the caller built is missing this round (§4.8.6 skip semantics) —
    /// the caller should simply drop the round rather than stitch a partial
    /// canvas.
    pub fn stitch(&self, frames: Frames) -> Result<Mat> {
        let balanced = luminance::balance(&frames, &self.masks, &self.layout)?;

        let mut canvas = Mat::new_rows_cols_with_default(
            self.layout.canvas_size().height,
            self.layout.canvas_size().width,
            CV_8UC3,
            Scalar::all(0.0),
        )?;

        for q in Quadrant::ALL {
            let a_tile_rect = self.layout.tile_slice_rect(q.a_camera(), q);
            let b_tile_rect = self.layout.tile_slice_rect(q.b_camera(), q);
            let a_slice = Mat::roi(balanced.get(q.a_camera()), a_tile_rect)?.try_clone()?;
            let b_slice = Mat::roi(balanced.get(q.b_camera()), b_tile_rect)?.try_clone()?;

            let g3 = broadcast3(self.weights.get(q))?;
            let blended = alpha_blend(&a_slice, &b_slice, &g3)?;

            let dest_rect = self.layout.quadrant_rect(q);
            let mut dest = Mat::roi(&canvas, dest_rect)?;
            blended.copy_to(&mut dest)?;
        }

        for cam in CameraId::ALL {
            let src_rect = self.layout.middle_strip_rect(cam);
            let dest_rect = self.layout.canvas_middle_rect(cam);
            let slice = Mat::roi(balanced.get(cam), src_rect)?.try_clone()?;
            let mut dest = Mat::roi(&canvas, dest_rect)?;
            slice.copy_to(&mut dest)?;
        }

        let mut canvas = white_balance(&canvas)?;
        overlay_car_icon(&mut canvas, &self.car_icon, self.layout.car_rect())?;
        Ok(canvas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: i32, height: i32, value: u8) -> Mat {
        Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(value as f64)).unwrap()
    }

    #[test]
    fn white_balance_leaves_an_already_neutral_canvas_unchanged() {
        let canvas = solid(8, 8, 128);
        let balanced = white_balance(&canvas).unwrap();
        let mean = opencv::core::mean(&balanced, &opencv::core::no_array()).unwrap();
        assert!((mean[0] - 128.0).abs() < 1.0);
        assert!((mean[1] - 128.0).abs() < 1.0);
        assert!((mean[2] - 128.0).abs() < 1.0);
    }

    #[test]
    fn broadcast3_preserves_weight_values_across_all_three_channels() {
        let weight = Mat::new_rows_cols_with_default(2, 2, CV_32FC1, Scalar::all(0.25)).unwrap();
        let g3 = broadcast3(&weight).unwrap();
        assert_eq!(g3.channels(), 3);
    }
}
