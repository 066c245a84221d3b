use crate::prelude::{FusionError, FusionResult};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

pub const ROWS: usize = 1400;
pub const COLS: usize = 3600;
pub const RESOLUTION_DEG: f64 = 0.1;
pub const LAT_MIN: f64 = -70.0;
pub const LAT_MAX: f64 = 70.0;
pub const LON_MIN: f64 = -180.0;
pub const LON_MAX: f64 = 180.0;

const CELLS_PER_DEG: f64 = 10.0;
/// Scaled distance under which a coordinate is treated as sitting on a cell edge.
const EDGE_EPSILON: f64 = 1e-9;

/// Row/column address in the fixed global grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridCell {
    row: usize,
    col: usize,
}

impl GridCell {
    pub fn new(row: usize, col: usize) -> FusionResult<Self> {
        if row >= ROWS || col >= COLS {
            return Err(FusionError::InvalidInput(format!(
                "grid cell ({}, {}) outside {}x{}",
                row, col, ROWS, COLS
            )));
        }
        Ok(Self { row, col })
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    /// Index pair for `ndarray` access.
    pub fn index(&self) -> [usize; 2] {
        [self.row, self.col]
    }
}

/// Mapping between geographic coordinates and [`GridCell`]s.
pub struct GridModel;

impl GridModel {
    pub fn shape() -> (usize, usize) {
        (ROWS, COLS)
    }

    pub fn contains(lat: f64, lon: f64) -> bool {
        (LAT_MIN..=LAT_MAX).contains(&lat) && (LON_MIN..LON_MAX).contains(&lon)
    }

    /// Nearest cell to `(lat, lon)`. A coordinate on a shared edge maps to the
    /// lower-index cell.
    pub fn cell_of(lat: f64, lon: f64) -> FusionResult<GridCell> {
        if !Self::contains(lat, lon) {
            return Err(FusionError::OutOfDomain { lat, lon });
        }
        Ok(GridCell {
            row: axis_index(lat, LAT_MIN, ROWS),
            col: axis_index(lon, LON_MIN, COLS),
        })
    }

    pub fn center_of(cell: GridCell) -> (f64, f64) {
        (axis_center(cell.row, LAT_MIN), axis_center(cell.col, LON_MIN))
    }

    /// Cell-centre latitudes, 70°S to 70°N.
    pub fn latitudes() -> Array1<f64> {
        Array1::from_shape_fn(ROWS, |row| axis_center(row, LAT_MIN))
    }

    /// Cell-centre longitudes, 180°W to 180°E.
    pub fn longitudes() -> Array1<f64> {
        Array1::from_shape_fn(COLS, |col| axis_center(col, LON_MIN))
    }
}

fn axis_index(value: f64, origin: f64, cells: usize) -> usize {
    let scaled = (value - origin) * CELLS_PER_DEG;
    let edge = scaled.round();
    let index = if (scaled - edge).abs() < EDGE_EPSILON {
        edge as i64 - 1
    } else {
        scaled.floor() as i64
    };
    index.clamp(0, cells as i64 - 1) as usize
}

fn axis_center(index: usize, origin: f64) -> f64 {
    origin + (index as f64 + 0.5) / CELLS_PER_DEG
}

#[cfg(test)]
mod tests {
    use super::*;

    const HALF_CELL: f64 = RESOLUTION_DEG / 2.0 + 1e-9;

    #[test]
    fn center_of_cell_of_stays_within_half_a_cell() {
        let mut lat = LAT_MIN;
        while lat < LAT_MAX {
            let mut lon = LON_MIN;
            while lon < LON_MAX {
                let cell = GridModel::cell_of(lat, lon).unwrap();
                let (clat, clon) = GridModel::center_of(cell);
                assert!((clat - lat).abs() <= HALF_CELL, "lat {} -> {}", lat, clat);
                assert!((clon - lon).abs() <= HALF_CELL, "lon {} -> {}", lon, clon);
                lon += 0.737;
            }
            lat += 0.313;
        }
    }

    #[test]
    fn centers_round_trip_for_every_row_and_column() {
        for row in 0..ROWS {
            let cell = GridCell::new(row, row % COLS).unwrap();
            let (lat, lon) = GridModel::center_of(cell);
            assert_eq!(GridModel::cell_of(lat, lon).unwrap(), cell);
        }
        for col in 0..COLS {
            let cell = GridCell::new(col % ROWS, col).unwrap();
            let (lat, lon) = GridModel::center_of(cell);
            assert_eq!(GridModel::cell_of(lat, lon).unwrap(), cell);
        }
    }

    #[test]
    fn edges_resolve_to_lower_index() {
        let cell = GridModel::cell_of(-69.8, -179.9).unwrap();
        assert_eq!((cell.row(), cell.col()), (1, 0));
        let cell = GridModel::cell_of(LAT_MIN, LON_MIN).unwrap();
        assert_eq!((cell.row(), cell.col()), (0, 0));
        let cell = GridModel::cell_of(LAT_MAX, 179.99).unwrap();
        assert_eq!((cell.row(), cell.col()), (ROWS - 1, COLS - 1));
    }

    #[test]
    fn out_of_domain_coordinates_fail() {
        assert!(matches!(
            GridModel::cell_of(70.01, 0.0),
            Err(FusionError::OutOfDomain { .. })
        ));
        assert!(GridModel::cell_of(0.0, 180.0).is_err());
        assert!(GridModel::cell_of(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn axis_vectors_have_fixed_extent() {
        let lats = GridModel::latitudes();
        let lons = GridModel::longitudes();
        assert_eq!(lats.len(), ROWS);
        assert_eq!(lons.len(), COLS);
        assert!((lats[0] + 69.95).abs() < 1e-9);
        assert!((lats[ROWS - 1] - 69.95).abs() < 1e-9);
        assert!((lons[0] + 179.95).abs() < 1e-9);
        assert!((lons[COLS - 1] - 179.95).abs() < 1e-9);
    }
}
