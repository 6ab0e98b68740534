//! Per-frame luminance balance (§4.8.2).
//!
//! Matches average brightness across the four cameras, per channel, before
//! blending — otherwise the seams flash every frame as autoexposure drifts
//! independently per camera. Channel order is fixed `B, G, R` end to end
//! (§9 open-question resolution); nothing here ever treats a channel as
//! `R, G, B`.

use opencv::core::{Mat, Scalar, Vector, CV_8UC1};
use opencv::prelude::*;

use crate::error::Result;
use crate::geometry::{CameraId, CanvasLayout, Quadrant};

/// The four per-quadrant overlap masks produced by the offline weight
/// builder (§4.8.1), indexed the same way `Quadrant::channel` indexes the
/// packed weights/masks image.
pub struct QuadrantMasks {
    pub masks: [Mat; 4],
}

impl QuadrantMasks {
    pub fn get(&self, q: Quadrant) -> &Mat {
        &self.masks[q.channel()]
    }
}

/// Ratio of two channels' masked means. §9's divide-by-zero contract: a
/// denominator mean below `1e-6` yields a ratio of 1.0 rather than a
/// division blowup (a camera's overlap region being black is expected,
/// not exceptional).
fn masked_mean_ratio(numerator: &Mat, denominator: &Mat, mask: &Mat) -> opencv::Result<f64> {
    let mean_num = opencv::core::mean(numerator, mask)?[0];
    let mean_den = opencv::core::mean(denominator, mask)?[0];
    if mean_den.abs() < 1e-6 {
        Ok(1.0)
    } else {
        Ok(mean_num / mean_den)
    }
}

/// Softens an overcorrecting gain (§4.8.2's `tune`): gains pulling toward
/// brighter are damped harder than gains pulling toward darker, since
/// overexposure is visually worse than slight underexposure at a seam.
fn tune(x: f64) -> f64 {
    if x >= 1.0 {
        x * ((1.0 - x) * 0.5).exp()
    } else {
        x * ((1.0 - x) * 0.8).exp()
    }
}

/// Multiplies one BGR channel by `gain`, clipping to `[0,255]` (OpenCV's
/// `CV_8U` arithmetic saturates automatically).
fn adjust_luminance(channel: &Mat, gain: f64) -> opencv::Result<Mat> {
    let mut out = Mat::default();
    opencv::core::multiply(channel, &Scalar::all(gain), &mut out, 1.0, CV_8UC1)?;
    Ok(out)
}

fn split3(img: &Mat) -> opencv::Result<Vector<Mat>> {
    let mut channels = Vector::new();
    opencv::core::split(img, &mut channels)?;
    Ok(channels)
}

fn merge3(channels: &Vector<Mat>) -> opencv::Result<Mat> {
    let mut out = Mat::default();
    opencv::core::merge(channels, &mut out)?;
    Ok(out)
}

/// The four oriented, canvas-shaped frames this round, keyed by camera.
pub struct Frames {
    pub front: Mat,
    pub back: Mat,
    pub left: Mat,
    pub right: Mat,
}

impl Frames {
    pub fn get(&self, cam: CameraId) -> &Mat {
        match cam {
            CameraId::Front => &self.front,
            CameraId::Back => &self.back,
            CameraId::Left => &self.left,
            CameraId::Right => &self.right,
        }
    }
}

/// Balances `frames` against the four quadrant overlap masks and returns a
/// new, gain-adjusted set (§4.8.2). Must run before `stitch` (§4.8's
/// ordering contract).
pub fn balance(frames: &Frames, masks: &QuadrantMasks, layout: &CanvasLayout) -> Result<Frames> {
    let tile = |cam: CameraId, q: Quadrant| -> opencv::Result<Mat> {
        let rect = layout.tile_slice_rect(cam, q);
        Mat::roi(frames.get(cam), rect)?.try_clone()
    };

    // The four adjacent-overlap ratios from §4.8.2, one triple per channel.
    let front_fr = tile(CameraId::Front, Quadrant::FrontRight)?;
    let right_fr = tile(CameraId::Right, Quadrant::FrontRight)?;
    let back_br = tile(CameraId::Back, Quadrant::BackRight)?;
    let right_br = tile(CameraId::Right, Quadrant::BackRight)?;
    let back_bl = tile(CameraId::Back, Quadrant::BackLeft)?;
    let left_bl = tile(CameraId::Left, Quadrant::BackLeft)?;
    let front_fl = tile(CameraId::Front, Quadrant::FrontLeft)?;
    let left_fl = tile(CameraId::Left, Quadrant::FrontLeft)?;

    let m_fl = masks.get(Quadrant::FrontLeft);
    let m_fr = masks.get(Quadrant::FrontRight);
    let m_bl = masks.get(Quadrant::BackLeft);
    let m_br = masks.get(Quadrant::BackRight);

    let front_ch = split3(&front_fr)?;
    let right_fr_ch = split3(&right_fr)?;
    let back_br_ch = split3(&back_br)?;
    let right_br_ch = split3(&right_br)?;
    let back_bl_ch = split3(&back_bl)?;
    let left_bl_ch = split3(&left_bl)?;
    let front_fl_ch = split3(&front_fl)?;
    let left_fl_ch = split3(&left_fl)?;

    let mut a = [0f64; 3]; // right / front, over FR
    let mut b = [0f64; 3]; // back / right, over BR
    let mut c = [0f64; 3]; // left / back, over BL
    let mut d = [0f64; 3]; // front / left, over FL
    for ch in 0..3 {
        a[ch] = masked_mean_ratio(&right_fr_ch.get(ch)?, &front_ch.get(ch)?, m_fr)?;
        b[ch] = masked_mean_ratio(&back_br_ch.get(ch)?, &right_br_ch.get(ch)?, m_br)?;
        c[ch] = masked_mean_ratio(&left_bl_ch.get(ch)?, &back_bl_ch.get(ch)?, m_bl)?;
        d[ch] = masked_mean_ratio(&front_fl_ch.get(ch)?, &left_fl_ch.get(ch)?, m_fl)?;
    }

    let mut t = [0f64; 3];
    for ch in 0..3 {
        t[ch] = (a[ch] * b[ch] * c[ch] * d[ch]).powf(0.25);
    }

    let front_gain = |ch: usize| tune(t[ch] * (a[ch] / d[ch]).sqrt());
    let back_gain = |ch: usize| tune(t[ch] * (c[ch] / b[ch]).sqrt());
    let left_gain = |ch: usize| tune(t[ch] * (d[ch] / c[ch]).sqrt());
    let right_gain = |ch: usize| tune(t[ch] * (b[ch] / a[ch]).sqrt());

    let apply = |img: &Mat, gain_of: &dyn Fn(usize) -> f64| -> opencv::Result<Mat> {
        let channels = split3(img)?;
        let mut out = Vector::new();
        for ch in 0..3usize {
            out.push(adjust_luminance(&channels.get(ch)?, gain_of(ch))?);
        }
        merge3(&out)
    };

    Ok(Frames {
        front: apply(&frames.front, &front_gain)?,
        back: apply(&frames.back, &back_gain)?,
        left: apply(&frames.left, &left_gain)?,
        right: apply(&frames.right, &right_gain)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tune_is_identity_at_one() {
        assert!((tune(1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tune_damps_large_gains_below_their_raw_value() {
        assert!(tune(2.0) < 2.0);
        assert!(tune(0.5) > 0.0);
    }

    #[test]
    fn masked_mean_ratio_defaults_to_one_on_black_denominator() {
        let black = Mat::new_rows_cols_with_default(4, 4, opencv::core::CV_8UC1, Scalar::all(0.0)).unwrap();
        let bright = Mat::new_rows_cols_with_default(4, 4, opencv::core::CV_8UC1, Scalar::all(200.0)).unwrap();
        let mask = Mat::new_rows_cols_with_default(4, 4, opencv::core::CV_8UC1, Scalar::all(255.0)).unwrap();
        let ratio = masked_mean_ratio(&bright, &black, &mask).unwrap();
        assert!((ratio - 1.0).abs() < 1e-9);
    }
}
