//! Canvas layout: the one set of constants every other component agrees on.
//!
//! Modeled as a single immutable value (§9 design note "Global geometry
//! constants") rather than a module of `const`s, so a future rig with
//! different body dimensions can construct its own `CanvasLayout` without
//! touching any other component.

use opencv::core::{Mat, Rect, Size};
use opencv::prelude::*;

/// The four camera mount positions. Order is significant where it's used to
/// index fixed-size `[T; 4]` arrays (`CameraId::ALL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraId {
    Front,
    Back,
    Left,
    Right,
}

impl CameraId {
    pub const ALL: [CameraId; 4] = [
        CameraId::Front,
        CameraId::Back,
        CameraId::Left,
        CameraId::Right,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CameraId::Front => "front",
            CameraId::Back => "back",
            CameraId::Left => "left",
            CameraId::Right => "right",
        }
    }

    pub fn index(self) -> usize {
        match self {
            CameraId::Front => 0,
            CameraId::Back => 1,
            CameraId::Left => 2,
            CameraId::Right => 3,
        }
    }

    pub fn from_name(name: &str) -> Option<CameraId> {
        match name {
            "front" => Some(CameraId::Front),
            "back" => Some(CameraId::Back),
            "left" => Some(CameraId::Left),
            "right" => Some(CameraId::Right),
            _ => None,
        }
    }
}

/// One of the four corner regions where two adjacent camera projections
/// overlap. `a` is the front/back contributor, `b` is the left/right one,
/// matching §4.8's "tiles `A`, `B`" naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quadrant {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::FrontLeft,
        Quadrant::FrontRight,
        Quadrant::BackLeft,
        Quadrant::BackRight,
    ];

    /// Channel index into the packed 4-channel weights/masks image.
    pub fn channel(self) -> usize {
        match self {
            Quadrant::FrontLeft => 0,
            Quadrant::FrontRight => 1,
            Quadrant::BackLeft => 2,
            Quadrant::BackRight => 3,
        }
    }

    pub fn a_camera(self) -> CameraId {
        match self {
            Quadrant::FrontLeft | Quadrant::FrontRight => CameraId::Front,
            Quadrant::BackLeft | Quadrant::BackRight => CameraId::Back,
        }
    }

    pub fn b_camera(self) -> CameraId {
        match self {
            Quadrant::FrontLeft | Quadrant::BackLeft => CameraId::Left,
            Quadrant::FrontRight | Quadrant::BackRight => CameraId::Right,
        }
    }
}

/// Process-wide canvas geometry. Construct once (`CanvasLayout::default()`
/// for the reference rig) and share by reference; nothing here ever
/// mutates after construction.
#[derive(Debug, Clone, Copy)]
pub struct CanvasLayout {
    pub shift_w: i32,
    pub shift_h: i32,
    pub inn_shift_w: i32,
    pub inn_shift_h: i32,
    pub total_w: i32,
    pub total_h: i32,
    pub xl: i32,
    pub xr: i32,
    pub yt: i32,
    pub yb: i32,
}

impl Default for CanvasLayout {
    fn default() -> Self {
        let shift_w = 300;
        let shift_h = 300;
        let inn_shift_w = 20;
        let inn_shift_h = 50;
        let total_w = 600 + 2 * shift_w;
        let total_h = 1000 + 2 * shift_h;
        let xl = shift_w + 180 + inn_shift_w;
        let xr = total_w - xl;
        let yt = shift_h + 200 + inn_shift_h;
        let yb = total_h - yt;
        Self {
            shift_w,
            shift_h,
            inn_shift_w,
            inn_shift_h,
            total_w,
            total_h,
            xl,
            xr,
            yt,
            yb,
        }
    }
}

impl CanvasLayout {
    /// Shape (width, height) a camera's frame must have after `project` +
    /// `flip`, in canvas-pixel space.
    pub fn projected_shape(&self, cam: CameraId) -> Size {
        match cam {
            CameraId::Front | CameraId::Back => Size::new(self.total_w, self.yt),
            CameraId::Left | CameraId::Right => Size::new(self.total_h, self.xl),
        }
    }

    pub fn canvas_size(&self) -> Size {
        Size::new(self.total_w, self.total_h)
    }

    /// The car-icon rectangle at the center of the canvas.
    pub fn car_rect(&self) -> Rect {
        Rect::new(self.xl, self.yt, self.xr - self.xl, self.yb - self.yt)
    }

    /// Rectangle of the given overlap quadrant, in full-canvas coordinates.
    pub fn quadrant_rect(&self, q: Quadrant) -> Rect {
        match q {
            Quadrant::FrontLeft => Rect::new(0, 0, self.xl, self.yt),
            Quadrant::FrontRight => Rect::new(self.xr, 0, self.total_w - self.xr, self.yt),
            Quadrant::BackLeft => Rect::new(0, self.yb, self.xl, self.total_h - self.yb),
            Quadrant::BackRight => {
                Rect::new(self.xr, self.yb, self.total_w - self.xr, self.total_h - self.yb)
            }
        }
    }

    /// Non-overlap middle strip of a camera's own oriented tile (the part
    /// copied straight into the canvas by §4.8.3, untouched by blending).
    pub fn middle_strip_rect(&self, cam: CameraId) -> Rect {
        match cam {
            CameraId::Front => Rect::new(self.xl, 0, self.xr - self.xl, self.yt),
            CameraId::Back => Rect::new(self.xl, 0, self.xr - self.xl, self.yt),
            CameraId::Left => Rect::new(0, self.yt, self.xl, self.yb - self.yt),
            CameraId::Right => Rect::new(0, self.yt, self.xl, self.yb - self.yt),
        }
    }

    /// Canvas-absolute destination rectangle for a camera's non-overlap
    /// middle strip (§4.8.3's "copy the four non-overlap edge strips...
    /// directly"). Distinct from `middle_strip_rect`, which gives the same
    /// strip's rectangle in the *source* tile's own local coordinates —
    /// those coincide for front/left/right (whose oriented tile shares an
    /// origin with the canvas) but not for back, whose tile is canvas-sized
    /// yet sits at the opposite edge.
    pub fn canvas_middle_rect(&self, cam: CameraId) -> Rect {
        match cam {
            CameraId::Front => Rect::new(self.xl, 0, self.xr - self.xl, self.yt),
            CameraId::Back => Rect::new(self.xl, self.yb, self.xr - self.xl, self.total_h - self.yb),
            CameraId::Left => Rect::new(0, self.yt, self.xl, self.yb - self.yt),
            CameraId::Right => Rect::new(self.xr, self.yt, self.total_w - self.xr, self.yb - self.yt),
        }
    }

    /// Slice of a camera's own oriented tile that contributes to quadrant
    /// `q`, in that tile's own local coordinates (not canvas coordinates).
    pub fn tile_slice_rect(&self, cam: CameraId, q: Quadrant) -> Rect {
        let shape = self.projected_shape(cam);
        match cam {
            CameraId::Front | CameraId::Back => match q {
                Quadrant::FrontLeft | Quadrant::BackLeft => Rect::new(0, 0, self.xl, shape.height),
                Quadrant::FrontRight | Quadrant::BackRight => {
                    Rect::new(self.xr, 0, shape.width - self.xr, shape.height)
                }
            },
            CameraId::Left | CameraId::Right => match q {
                Quadrant::FrontLeft | Quadrant::FrontRight => Rect::new(0, 0, self.xl, self.yt),
                Quadrant::BackLeft | Quadrant::BackRight => {
                    Rect::new(0, self.yb, self.xl, self.total_h - self.yb)
                }
            },
        }
    }
}

/// Rotates a projected frame into canonical canvas orientation (§4.1).
///
/// `front` is the identity: a projected front frame is already oriented.
/// `back` is rotated 180 degrees (flip both axes). `left` is transposed
/// then row-reversed (90 degrees counter-clockwise). `right` is transposed
/// then column-reversed (90 degrees clockwise).
pub fn flip(cam: CameraId, img: &Mat) -> opencv::Result<Mat> {
    use opencv::core::{flip, transpose, ROTATE_90_CLOCKWISE, ROTATE_90_COUNTERCLOCKWISE};
    match cam {
        CameraId::Front => Ok(img.clone()),
        CameraId::Back => {
            let mut out = Mat::default();
            flip(img, &mut out, -1)?; // both axes == 180 degree rotation
            Ok(out)
        }
        CameraId::Left => {
            let mut out = Mat::default();
            opencv::core::rotate(img, &mut out, ROTATE_90_COUNTERCLOCKWISE)?;
            let _ = transpose; // rotate() already composes transpose+flip; kept for doc clarity
            Ok(out)
        }
        CameraId::Right => {
            let mut out = Mat::default();
            opencv::core::rotate(img, &mut out, ROTATE_90_CLOCKWISE)?;
            Ok(out)
        }
    }
}

/// Inverse of `flip` for a given camera — used by tests to check the
/// orientation involution property (§8).
pub fn unflip(cam: CameraId, img: &Mat) -> opencv::Result<Mat> {
    use opencv::core::{flip, ROTATE_90_CLOCKWISE, ROTATE_90_COUNTERCLOCKWISE};
    match cam {
        CameraId::Front => Ok(img.clone()),
        CameraId::Back => {
            let mut out = Mat::default();
            flip(img, &mut out, -1)?;
            Ok(out)
        }
        CameraId::Left => {
            let mut out = Mat::default();
            opencv::core::rotate(img, &mut out, ROTATE_90_CLOCKWISE)?;
            Ok(out)
        }
        CameraId::Right => {
            let mut out = Mat::default();
            opencv::core::rotate(img, &mut out, ROTATE_90_COUNTERCLOCKWISE)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(CameraId::Front, 1200, 550; "front")]
    #[test_case(CameraId::Back, 1200, 550; "back")]
    #[test_case(CameraId::Left, 1600, 500; "left")]
    #[test_case(CameraId::Right, 1600, 500; "right")]
    fn projected_shape_matches_reference_rig(cam: CameraId, width: i32, height: i32) {
        let l = CanvasLayout::default();
        assert_eq!(l.projected_shape(cam), Size::new(width, height));
    }

    #[test]
    fn layout_constants_match_reference_rig() {
        let l = CanvasLayout::default();
        assert_eq!(l.total_w, 1200);
        assert_eq!(l.total_h, 1600);
        assert_eq!(l.xl, 500);
        assert_eq!(l.xr, 700);
        assert_eq!(l.yt, 550);
        assert_eq!(l.yb, 1050);
    }

    #[test]
    fn canvas_middle_rect_places_back_strip_at_the_far_edge() {
        let l = CanvasLayout::default();
        assert_eq!(l.middle_strip_rect(CameraId::Back), Rect::new(l.xl, 0, l.xr - l.xl, l.yt));
        assert_eq!(
            l.canvas_middle_rect(CameraId::Back),
            Rect::new(l.xl, l.yb, l.xr - l.xl, l.total_h - l.yb)
        );
    }

    #[test]
    fn back_flip_is_involutive() {
        let img = Mat::new_rows_cols_with_default(4, 6, opencv::core::CV_8UC1, 1.0.into())
            .unwrap();
        let once = flip(CameraId::Back, &img).unwrap();
        let twice = flip(CameraId::Back, &once).unwrap();
        assert_eq!(img.size().unwrap(), twice.size().unwrap());
    }

    #[test]
    fn left_right_flip_round_trips_via_unflip() {
        let img = Mat::new_rows_cols_with_default(4, 6, opencv::core::CV_8UC1, 1.0.into())
            .unwrap();
        let left = flip(CameraId::Left, &img).unwrap();
        let back = unflip(CameraId::Left, &left).unwrap();
        assert_eq!(back.size().unwrap(), img.size().unwrap());
    }
}
