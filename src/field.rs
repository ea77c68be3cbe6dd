// field.rs — Dense 2D field of RGBA-like 4-vectors.
//
// Every quantity the multigrid solver touches (stencil rows, right-hand
// side, solution, residual) is a `Field`: a row-major `Vec<[f32; 4]>` with
// runtime dimensions. The four components are solved independently; the
// stencil fields reuse the slots for coefficients and the active flag.
//
// Memory layout (width = 4, height = 2):
//
//   data: [ t00 t10 t20 t30 | t01 t11 t21 t31 ]
//            ---- row 0 ----   ---- row 1 ----
//
// There is no stride padding: fields are uploaded into textures through
// `queue.write_texture`, which handles row alignment itself, and readback
// strips the 256-byte row padding before building a `Field` (see
// gpu/field.rs).
//
// Out-of-range reads clamp to the nearest edge texel (`get_clamped`). That
// is the only boundary rule the solver uses, on the CPU and on the GPU
// (`textureLoad` with clamped coordinates).

use std::fmt;

/// One RGBA-like unknown.
pub type Texel = [f32; 4];

pub const ZERO: Texel = [0.0; 4];

// ---------------------------------------------------------------------------
// Texel arithmetic
// ---------------------------------------------------------------------------

#[inline]
pub fn add(a: Texel, b: Texel) -> Texel {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2], a[3] + b[3]]
}

#[inline]
pub fn sub(a: Texel, b: Texel) -> Texel {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2], a[3] - b[3]]
}

#[inline]
pub fn scale(a: Texel, s: f32) -> Texel {
    [a[0] * s, a[1] * s, a[2] * s, a[3] * s]
}

/// `a + s * b`, componentwise.
#[inline]
pub fn mul_add(a: Texel, s: f32, b: Texel) -> Texel {
    [a[0] + s * b[0], a[1] + s * b[1], a[2] + s * b[2], a[3] + s * b[3]]
}

/// Euclidean length of the 4-vector (the per-pixel residual magnitude).
#[inline]
pub fn length(a: Texel) -> f32 {
    (a[0] * a[0] + a[1] * a[1] + a[2] * a[2] + a[3] * a[3]).sqrt()
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// A dense `width × height` grid of [`Texel`]s.
#[derive(Clone, PartialEq)]
pub struct Field {
    width: usize,
    height: usize,
    data: Vec<Texel>,
}

impl Field {
    /// Zero-filled field.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, ZERO)
    }

    pub fn filled(width: usize, height: usize, value: Texel) -> Self {
        assert!(width > 0 && height > 0, "field dimensions must be at least 1×1");
        Field { width, height, data: vec![value; width * height] }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// # Panics
    /// If `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<Texel>) -> Self {
        assert!(width > 0 && height > 0, "field dimensions must be at least 1×1");
        assert_eq!(
            data.len(),
            width * height,
            "buffer length {} does not match {}×{}",
            data.len(),
            width,
            height
        );
        Field { width, height, data }
    }

    /// Build a field by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> Texel) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self::from_vec(width, height, data)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Texel {
        debug_assert!(x < self.width && y < self.height, "({x}, {y}) out of bounds");
        self.data[y * self.width + x]
    }

    /// Read with clamp-to-edge addressing. Accepts negative coordinates.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> Texel {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[cy * self.width + cx]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: Texel) {
        debug_assert!(x < self.width && y < self.height, "({x}, {y}) out of bounds");
        self.data[y * self.width + x] = value;
    }

    /// Overwrite every texel with `value`.
    pub fn fill(&mut self, value: Texel) {
        self.data.iter_mut().for_each(|t| *t = value);
    }

    /// Copy `other` into `self` without reallocating.
    ///
    /// # Panics
    /// If the dimensions differ.
    pub fn copy_from(&mut self, other: &Field) {
        assert_eq!(self.dims(), other.dims(), "field dimensions differ");
        self.data.copy_from_slice(&other.data);
    }

    pub fn as_slice(&self) -> &[Texel] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Texel] {
        &mut self.data
    }

    /// Iterate `(x, y, texel)` in row-major order.
    pub fn texels(&self) -> impl Iterator<Item = (usize, usize, Texel)> + '_ {
        let w = self.width;
        self.data.iter().enumerate().map(move |(i, &t)| (i % w, i / w, t))
    }

    /// Mean Euclidean length over all texels.
    pub fn mean_length(&self) -> f32 {
        let sum: f64 = self.data.iter().map(|&t| length(t) as f64).sum();
        (sum / self.data.len() as f64) as f32
    }

    /// Largest componentwise absolute difference to `other`.
    pub fn max_abs_diff(&self, other: &Field) -> f32 {
        assert_eq!(self.dims(), other.dims(), "field dimensions differ");
        self.data
            .iter()
            .zip(&other.data)
            .flat_map(|(a, b)| (0..4).map(move |c| (a[c] - b[c]).abs()))
            .fold(0.0, f32::max)
    }

    /// Unpack tightly packed 8-bit RGBA into `[0, 1]` texels.
    ///
    /// # Panics
    /// If `bytes.len() != width * height * 4`.
    pub fn from_rgba8(width: usize, height: usize, bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), width * height * 4, "RGBA8 buffer size");
        let data = bytes
            .chunks_exact(4)
            .map(|p| {
                let f = |v: u8| f32::from(v) / 255.0;
                [f(p[0]), f(p[1]), f(p[2]), f(p[3])]
            })
            .collect();
        Self::from_vec(width, height, data)
    }

    /// Pack into 8-bit RGBA, clamping to `[0, 1]`.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.data
            .iter()
            .flat_map(|t| t.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect()
    }

    /// Raw bytes for `queue.write_texture` (Rgba32Float, tightly packed).
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Field {}×{}", self.width, self.height)?;
        if self.width * self.height <= 64 {
            for y in 0..self.height {
                write!(f, "  ")?;
                for x in 0..self.width {
                    let t = self.get(x, y);
                    write!(f, "[{:6.2} {:6.2} {:6.2} {:6.2}] ", t[0], t[1], t[2], t[3])?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

impl std::ops::Index<(usize, usize)> for Field {
    type Output = Texel;

    fn index(&self, (x, y): (usize, usize)) -> &Texel {
        &self.data[y * self.width + x]
    }
}

impl std::ops::IndexMut<(usize, usize)> for Field {
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Texel {
        &mut self.data[y * self.width + x]
    }
}

// ---------------------------------------------------------------------------
// Bilinear sampling
// ---------------------------------------------------------------------------

/// Sample `field` at fractional coordinates with clamp-to-edge bilinear
/// interpolation. Integer coordinates return the texel exactly.
pub fn sample_bilinear(field: &Field, x: f32, y: f32) -> Texel {
    let max_x = (field.width() - 1) as f32;
    let max_y = (field.height() - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let x1 = (x0 + 1).min(field.width() - 1);
    let y1 = (y0 + 1).min(field.height() - 1);

    let p00 = field.get(x0, y0);
    let p10 = field.get(x1, y0);
    let p01 = field.get(x0, y1);
    let p11 = field.get(x1, y1);

    let mut out = ZERO;
    for c in 0..4 {
        out[c] = (1.0 - fx) * (1.0 - fy) * p00[c]
            + fx * (1.0 - fy) * p10[c]
            + (1.0 - fx) * fy * p01[c]
            + fx * fy * p11[c];
    }
    out
}
