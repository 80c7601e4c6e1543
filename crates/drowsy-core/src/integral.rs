//! Summed-area tables for constant-time rectangle sums.

/// Integral and squared-integral image of an 8-bit plane.
///
/// Both tables are `(width + 1) * (height + 1)` with a zero first row and
/// column, so the sum over `[x, x+w) x [y, y+h)` is four lookups.
pub struct IntegralImage {
    pub width: usize,
    pub height: usize,
    sum: Vec<u64>,
    sqsum: Vec<f64>,
}

impl IntegralImage {
    pub fn new(gray: &[u8], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sum = vec![0u64; stride * (height + 1)];
        let mut sqsum = vec![0f64; stride * (height + 1)];

        for y in 0..height {
            let mut row_sum = 0u64;
            let mut row_sq = 0f64;
            for x in 0..width {
                let p = gray[y * width + x];
                row_sum += p as u64;
                row_sq += (p as f64) * (p as f64);
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row_sum;
                sqsum[idx] = sqsum[idx - stride] + row_sq;
            }
        }

        Self {
            width,
            height,
            sum,
            sqsum,
        }
    }

    /// Pixel sum over `[x, x+w) x [y, y+h)`. The caller keeps it in bounds.
    #[inline]
    pub fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let stride = self.width + 1;
        let a = self.sum[y * stride + x];
        let b = self.sum[y * stride + x + w];
        let c = self.sum[(y + h) * stride + x];
        let d = self.sum[(y + h) * stride + x + w];
        (d + a - b - c) as f64
    }

    /// Sum of squared pixels over `[x, x+w) x [y, y+h)`.
    #[inline]
    pub fn rect_sqsum(&self, x: usize, y: usize, w: usize, h: usize) -> f64 {
        let stride = self.width + 1;
        let a = self.sqsum[y * stride + x];
        let b = self.sqsum[y * stride + x + w];
        let c = self.sqsum[(y + h) * stride + x];
        let d = self.sqsum[(y + h) * stride + x + w];
        d - b - c + a
    }
}
