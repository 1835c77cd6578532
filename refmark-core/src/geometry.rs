use serde::{Deserialize, Serialize};

/// Affine transform `[a b c d e f]` mapping `(x, y)` to
/// `(a*x + c*y + e, b*x + d*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    pub const fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub const fn translation(x: f32, y: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, x, y)
    }

    pub fn compose(outer: &Matrix, inner: &Matrix) -> Matrix {
        Matrix {
            a: outer.a * inner.a + outer.c * inner.b,
            b: outer.b * inner.a + outer.d * inner.b,
            c: outer.a * inner.c + outer.c * inner.d,
            d: outer.b * inner.c + outer.d * inner.d,
            e: outer.a * inner.e + outer.c * inner.f + outer.e,
            f: outer.b * inner.e + outer.d * inner.f + outer.f,
        }
    }

    pub fn then(&self, outer: &Matrix) -> Matrix {
        Matrix::compose(outer, self)
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Visible page box in user-space points: lower-left corner, unrotated size
/// and the `/Rotate` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: u16,
}

impl PageGeometry {
    pub fn new(width: f32, height: f32, rotation: i32) -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            width,
            height,
            rotation: normalize_rotation(rotation),
        }
    }

    pub fn with_origin(mut self, x: f32, y: f32) -> Self {
        self.origin_x = x;
        self.origin_y = y;
        self
    }
}

fn normalize_rotation(degrees: i32) -> u16 {
    let quarter = (degrees.rem_euclid(360) + 45) / 90 % 4;
    (quarter * 90) as u16
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayTransform {
    pub matrix: Matrix,
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

impl DisplayTransform {
    pub fn for_page(geometry: PageGeometry, scale: f32) -> Self {
        let half_width = geometry.width / 2.0;
        let half_height = geometry.height / 2.0;
        let center_x = geometry.origin_x + half_width;
        let center_y = geometry.origin_y + half_height;
        let (ra, rb, rc, rd) = match geometry.rotation {
            90 => (0.0, 1.0, 1.0, 0.0),
            180 => (-1.0, 0.0, 0.0, 1.0),
            270 => (0.0, -1.0, -1.0, 0.0),
            _ => (1.0, 0.0, 0.0, -1.0),
        };

        // Quarter turns swap the surface's axes.
        let (offset_x, offset_y, width, height) = if ra == 0.0 {
            (
                half_height * scale,
                half_width * scale,
                geometry.height * scale,
                geometry.width * scale,
            )
        } else {
            (
                half_width * scale,
                half_height * scale,
                geometry.width * scale,
                geometry.height * scale,
            )
        };

        let matrix = Matrix {
            a: ra * scale,
            b: rb * scale,
            c: rc * scale,
            d: rd * scale,
            e: offset_x - ra * scale * center_x - rc * scale * center_y,
            f: offset_y - rb * scale * center_x - rd * scale * center_y,
        };

        Self {
            matrix,
            width,
            height,
            scale,
        }
    }

    pub fn surface_width(&self) -> u32 {
        self.width.max(0.0).floor() as u32
    }

    pub fn surface_height(&self) -> u32 {
        self.height.max(0.0).floor() as u32
    }

    pub fn vertical_scale(&self) -> f32 {
        self.matrix.c.hypot(self.matrix.d)
    }

    pub fn to_surface(&self, local: &Matrix) -> Matrix {
        local.then(&self.matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: (f32, f32), expected: (f32, f32)) {
        assert!(
            (actual.0 - expected.0).abs() < 1e-3 && (actual.1 - expected.1).abs() < 1e-3,
            "{:?} != {:?}",
            actual,
            expected
        );
    }

    #[test]
    fn compose_applies_inner_first() {
        let scale = Matrix::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0);
        let shift = Matrix::translation(10.0, 5.0);

        let shift_then_scale = Matrix::compose(&scale, &shift);
        assert_close(shift_then_scale.apply(1.0, 1.0), (22.0, 12.0));

        let scale_then_shift = scale.then(&shift);
        assert_close(scale_then_shift.apply(1.0, 1.0), (12.0, 7.0));
    }

    #[test]
    fn identity_is_neutral() {
        let m = Matrix::new(1.5, 0.25, -0.5, 2.0, 3.0, 4.0);
        assert_eq!(Matrix::compose(&Matrix::IDENTITY, &m), m);
        assert_eq!(Matrix::compose(&m, &Matrix::IDENTITY), m);
    }

    #[test]
    fn unrotated_page_flips_y_axis() {
        let transform = DisplayTransform::for_page(PageGeometry::new(612.0, 792.0, 0), 1.5);

        assert_close(transform.matrix.apply(0.0, 792.0), (0.0, 0.0));
        assert_close(transform.matrix.apply(0.0, 0.0), (0.0, 1188.0));
        assert_close(transform.matrix.apply(612.0, 0.0), (918.0, 1188.0));
        assert_eq!(transform.surface_width(), 918);
        assert_eq!(transform.surface_height(), 1188);
        assert!((transform.vertical_scale() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn quarter_turn_swaps_surface_axes() {
        let transform = DisplayTransform::for_page(PageGeometry::new(612.0, 792.0, 90), 1.0);

        assert_eq!(transform.surface_width(), 792);
        assert_eq!(transform.surface_height(), 612);
        // top-left corner of the page lands on the top-right of the surface
        assert_close(transform.matrix.apply(0.0, 792.0), (792.0, 0.0));
        assert_close(transform.matrix.apply(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn half_turn_keeps_dimensions() {
        let transform = DisplayTransform::for_page(PageGeometry::new(100.0, 200.0, 180), 2.0);

        assert_eq!(transform.surface_width(), 200);
        assert_eq!(transform.surface_height(), 400);
        assert_close(transform.matrix.apply(0.0, 0.0), (200.0, 0.0));
        assert_close(transform.matrix.apply(100.0, 200.0), (0.0, 400.0));
    }

    #[test]
    fn box_origin_is_translated_away() {
        let geometry = PageGeometry::new(612.0, 692.0, 0).with_origin(20.0, 100.0);
        let transform = DisplayTransform::for_page(geometry, 1.0);

        assert_eq!(transform.surface_width(), 612);
        assert_eq!(transform.surface_height(), 692);
        assert_close(transform.matrix.apply(20.0, 792.0), (0.0, 0.0));
        assert_close(transform.matrix.apply(20.0, 100.0), (0.0, 692.0));
        assert_close(transform.matrix.apply(632.0, 100.0), (612.0, 692.0));
    }

    #[test]
    fn box_origin_survives_quarter_turn() {
        let geometry = PageGeometry::new(612.0, 792.0, 90).with_origin(0.0, 100.0);
        let transform = DisplayTransform::for_page(geometry, 1.0);

        assert_close(transform.matrix.apply(0.0, 892.0), (792.0, 0.0));
        assert_close(transform.matrix.apply(0.0, 100.0), (0.0, 0.0));
    }

    #[test]
    fn rotation_is_normalized_to_quarter_turns() {
        assert_eq!(PageGeometry::new(1.0, 1.0, -90).rotation, 270);
        assert_eq!(PageGeometry::new(1.0, 1.0, 450).rotation, 90);
        assert_eq!(PageGeometry::new(1.0, 1.0, 360).rotation, 0);
    }
}
