//! The model domain: an extent that is a whole number of cells wide and tall.
use crate::grid::Extent;

/// Tolerance, in cells, for an extent to count as a whole number of cells.
const CELL_TOLERANCE: f64 = 1e-6;

/// A north-up grid of square cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    pub extent: Extent,
    pub cell_size: f64,
    /// Cell centers, west to east.
    pub x: Vec<f64>,
    /// Cell centers, north to south.
    pub y: Vec<f64>,
}

impl Domain {
    /// Lay cells over `extent`, which must already be a whole number of cells
    /// in each direction (see [`condition_to_cellsize`]).
    pub fn new(extent: Extent, cell_size: f64) -> Self {
        let nx = n_cells(extent.xmax - extent.xmin, cell_size).round() as usize;
        let ny = n_cells(extent.ymax - extent.ymin, cell_size).round() as usize;
        let half = cell_size / 2.0;
        let x = (0..nx).map(|i| extent.xmin + half + i as f64 * cell_size).collect();
        let y = (0..ny).map(|j| extent.ymax - half - j as f64 * cell_size).collect();
        Self { extent, cell_size, x, y }
    }

    pub fn nx(&self) -> usize {
        self.x.len()
    }

    pub fn ny(&self) -> usize {
        self.y.len()
    }

    /// Grid size as (columns, rows), the order the warp tool expects.
    pub fn size(&self) -> (usize, usize) {
        (self.nx(), self.ny())
    }
}

fn n_cells(length: f64, cell_size: f64) -> f64 {
    length / cell_size
}

/// Grow an extent by `pad` cells on the left, bottom, right and top.
pub fn pad_extent(extent: Extent, cell_size: f64, pad: [f64; 4]) -> Extent {
    Extent {
        xmin: extent.xmin - pad[0] * cell_size,
        ymin: extent.ymin - pad[1] * cell_size,
        xmax: extent.xmax + pad[2] * cell_size,
        ymax: extent.ymax + pad[3] * cell_size,
    }
}

/// Make the extent a whole number of cells wide and tall by moving its right
/// and top edges outward. Extents that already fit are returned unchanged.
pub fn condition_to_cellsize(extent: Extent, cell_size: f64) -> Extent {
    let condition = |lo: f64, hi: f64, axis: &str| {
        let n = n_cells(hi - lo, cell_size);
        if (n - n.round()).abs() < CELL_TOLERANCE {
            hi
        } else {
            let new_hi = lo + n.ceil() * cell_size;
            log::info!(
                "Extent along {axis} is not a multiple of {cell_size}, moving edge {hi} to {new_hi}"
            );
            new_hi
        }
    };

    Extent {
        xmin: extent.xmin,
        ymin: extent.ymin,
        xmax: condition(extent.xmin, extent.xmax, "x"),
        ymax: condition(extent.ymin, extent.ymax, "y"),
    }
}
