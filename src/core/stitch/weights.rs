//! Offline seam weight / mask computation (§4.8.1).
//!
//! Each overlap quadrant's blend weight `G_k` and binary mask `M_k` are
//! computed once from a static 4-frame calibration sample and persisted;
//! the runtime stitcher only ever loads the result. The per-pixel
//! distance-field fill is embarrassingly parallel over rows — the same
//! `par_chunks_mut`-over-rows shape `stmap.rs::parallel_exr` uses in the
//! teacher crate for its own per-pixel lookup tables.

use opencv::core::{Mat, Point, Point2f, Scalar, Vector, BORDER_CONSTANT, CV_32FC1, CV_8UC1};
use opencv::imgproc;
use opencv::prelude::*;
use rayon::prelude::*;

use crate::error::Result;

/// `dist_threshold` from §4.8.1 step 3, the design's tuned resolution of
/// the two source drafts' `1` vs `5` (§9 open question).
const DIST_THRESHOLD: f64 = 5.0;

/// One overlap quadrant's blend weight (`G`, `CV_32FC1`, values in
/// `[0,1]`) and binary overlap mask (`M`, `CV_8UC1`, values in `{0,255}`).
pub struct QuadrantWeight {
    pub weight: Mat,
    pub mask: Mat,
}

/// Converts a BGR image to a binary `{0,255}` mask — 255 wherever the
/// pixel carries any signal (§4.8.1 step 1's "threshold any non-zero gray
/// value").
fn convert_mask(img: &Mat) -> opencv::Result<Mat> {
    let mut gray = Mat::default();
    imgproc::cvt_color(img, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
    let mut mask = Mat::default();
    imgproc::threshold(&gray, &mut mask, 0.0, 255.0, imgproc::THRESH_BINARY)?;
    Ok(mask)
}

fn dilate_2x2_twice(mask: &Mat) -> opencv::Result<Mat> {
    let mut dilated = Mat::default();
    let kernel = Mat::new_rows_cols_with_default(2, 2, CV_8UC1, Scalar::all(1.0))?;
    imgproc::dilate(
        mask,
        &mut dilated,
        &kernel,
        Point::new(-1, -1),
        2,
        BORDER_CONSTANT,
        imgproc::morphology_default_border_value()?,
    )?;
    Ok(dilated)
}

/// Overlap mask `M_k` of two same-shaped tiles: pixelwise AND, thresholded,
/// dilated (§4.8.1 step 1).
fn overlap_mask(a: &Mat, b: &Mat) -> opencv::Result<Mat> {
    let mut overlap = Mat::default();
    opencv::core::bitwise_and(a, b, &mut overlap, &opencv::core::no_array())?;
    dilate_2x2_twice(&convert_mask(&overlap)?)
}

/// Largest-area external contour of `img`'s non-zero region, approximated
/// as a polygon with tolerance `0.009 * arcLength` (§4.8.1 step 2). Returns
/// an empty polygon for a degenerate (contour-less) region instead of
/// failing (§9 "`get_outmost_polygon_boundary` robustness").
fn outermost_polygon_boundary(img: &Mat) -> opencv::Result<Vector<Point>> {
    let dilated = dilate_2x2_twice(&convert_mask(img)?)?;

    let mut contours: Vector<Vector<Point>> = Vector::new();
    imgproc::find_contours(
        &dilated,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )?;

    if contours.is_empty() {
        return Ok(Vector::new());
    }

    let largest_idx = contours
        .iter()
        .enumerate()
        .map(|(i, c)| (i, imgproc::contour_area(&c, false).unwrap_or(0.0)))
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let contour = contours.get(largest_idx)?;
    let arc_len = imgproc::arc_length(&contour, true)?;

    let mut polygon = Vector::new();
    imgproc::approx_poly_dp(&contour, &mut polygon, 0.009 * arc_len, true)?;
    Ok(polygon)
}

/// Signed point-in-polygon distance; an empty polygon (degenerate capture,
/// §9) is treated as "infinitely far outside" so the weight field falls
/// back to its initial A-mask value rather than panicking.
fn signed_distance(polygon: &Vector<Point>, pt: Point2f) -> f64 {
    if polygon.is_empty() {
        return -1.0;
    }
    imgproc::point_polygon_test(polygon, pt, true).unwrap_or(-1.0)
}

/// Builds the smooth weight field `G` and binary mask `M` for one overlap
/// quadrant, given the two contributing tiles `a` (the front/back
/// contributor) and `b` (the left/right contributor), per §4.8.1.
pub fn weight_and_mask(a: &Mat, b: &Mat) -> Result<QuadrantWeight> {
    let mask = overlap_mask(a, b)?;
    let mut mask_inv = Mat::default();
    opencv::core::bitwise_not(&mask, &mut mask_inv, &opencv::core::no_array())?;

    let mut a_diff = Mat::default();
    opencv::core::bitwise_and(a, a, &mut a_diff, &mask_inv)?;
    let mut b_diff = Mat::default();
    opencv::core::bitwise_and(b, b, &mut b_diff, &mask_inv)?;

    let poly_a = outermost_polygon_boundary(&a_diff)?;
    let poly_b = outermost_polygon_boundary(&b_diff)?;

    let a_mask = convert_mask(a)?;
    let size = a_mask.size()?;
    let (width, height) = (size.width, size.height);

    // Row-major scratch buffers: G's initial value (the normalized A-mask)
    // and whether each pixel falls inside the overlap. Plain `Vec<f32>` /
    // `Vec<bool>` rather than `Mat` so the fill below can run across
    // `rayon`-parallel row chunks without fighting `Mat`'s borrow story.
    let mut g_init = vec![0f32; (width * height) as usize];
    let mut in_overlap = vec![false; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            g_init[idx] = if *a_mask.at_2d::<u8>(y, x)? > 0 { 1.0 } else { 0.0 };
            in_overlap[idx] = *mask.at_2d::<u8>(y, x)? > 0;
        }
    }

    let filled: Vec<f32> = g_init
        .par_chunks(width as usize)
        .zip(in_overlap.par_chunks(width as usize))
        .enumerate()
        .flat_map(|(y, (init_row, flag_row))| {
            init_row
                .iter()
                .zip(flag_row.iter())
                .enumerate()
                .map(move |(x, (init, inside))| {
                    if !*inside {
                        return *init;
                    }
                    let pt = Point2f::new(x as f32, y as f32);
                    let dist_b = signed_distance(&poly_b, pt);
                    if dist_b < DIST_THRESHOLD {
                        let dist_a = signed_distance(&poly_a, pt);
                        let (db2, da2) = (dist_b * dist_b, dist_a * dist_a);
                        if da2 + db2 > 0.0 {
                            (db2 / (da2 + db2)) as f32
                        } else {
                            *init
                        }
                    } else {
                        *init
                    }
                })
                .collect::<Vec<f32>>()
        })
        .collect();

    let mut weight = Mat::new_rows_cols_with_default(height, width, CV_32FC1, Scalar::all(0.0))?;
    for y in 0..height {
        for x in 0..width {
            *weight.at_2d_mut::<f32>(y, x)? = filled[(y * width + x) as usize];
        }
    }

    Ok(QuadrantWeight { weight, mask })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Vec3b, CV_8UC3};

    fn half_red_half_blue(width: i32, height: i32, split_at: i32) -> opencv::Result<Mat> {
        let mut img = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0))?;
        for y in 0..height {
            for x in 0..width {
                *img.at_2d_mut::<Vec3b>(y, x)? = if x < split_at {
                    Vec3b::from([0, 0, 255]) // red, BGR order
                } else {
                    Vec3b::from([255, 0, 0]) // blue, BGR order
                };
            }
        }
        Ok(img)
    }

    #[test]
    fn weight_field_stays_in_unit_range_and_hits_both_extremes() {
        let a = half_red_half_blue(40, 20, 25).unwrap();
        let b = half_red_half_blue(40, 20, 15).unwrap();
        let result = weight_and_mask(&a, &b).unwrap();
        let size = result.weight.size().unwrap();
        let mut saw_one = false;
        let mut saw_zero = false;
        for y in 0..size.height {
            for x in 0..size.width {
                let g = *result.weight.at_2d::<f32>(y, x).unwrap();
                assert!((0.0..=1.0).contains(&g));
                if g >= 0.999 {
                    saw_one = true;
                }
                if g <= 0.001 {
                    saw_zero = true;
                }
            }
        }
        assert!(saw_one, "expected some pixels fully attributed to A");
        assert!(saw_zero, "expected some pixels fully attributed to B");
    }

    #[test]
    fn mask_values_are_binary() {
        let a = half_red_half_blue(40, 20, 25).unwrap();
        let b = half_red_half_blue(40, 20, 15).unwrap();
        let result = weight_and_mask(&a, &b).unwrap();
        let size = result.mask.size().unwrap();
        for y in 0..size.height {
            for x in 0..size.width {
                let m = *result.mask.at_2d::<u8>(y, x).unwrap();
                assert!(m == 0 || m == 255);
            }
        }
    }
}
