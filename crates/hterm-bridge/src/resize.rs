use portable_pty::PtySize;

/// Width of one terminal cell in pixels, used to derive `pixel_width`.
pub const PIXELS_PER_COLUMN: u16 = 640 / 80;
/// Height of one terminal cell in pixels, used to derive `pixel_height`.
pub const PIXELS_PER_ROW: u16 = 480 / 24;

/// Terminal geometry as handed to the backing stream.
///
/// Mirrors the layout of the kernel `winsize` record: cell counts plus a
/// cosmetic pixel size that most programs ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowSize {
    /// Translates a logical cell size into full geometry. Callers validate
    /// that both dimensions are positive.
    pub fn from_cells(rows: u16, cols: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: cols.saturating_mul(PIXELS_PER_COLUMN),
            pixel_height: rows.saturating_mul(PIXELS_PER_ROW),
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::from_cells(24, 80)
    }
}

impl From<WindowSize> for PtySize {
    fn from(size: WindowSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: size.pixel_width,
            pixel_height: size.pixel_height,
        }
    }
}
