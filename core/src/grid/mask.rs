use super::model::{GridCell, COLS, ROWS};
use crate::prelude::{FusionError, FusionResult};
use ndarray::Array2;

/// Land/ocean classification of grid cells. Coverage statistics are computed
/// over land cells only.
#[derive(Debug, Clone, Default)]
pub struct LandMask {
    cells: Option<Array2<bool>>,
}

impl LandMask {
    /// Treats every cell as land.
    pub fn all_land() -> Self {
        Self { cells: None }
    }

    pub fn from_array(cells: Array2<bool>) -> FusionResult<Self> {
        if cells.dim() != (ROWS, COLS) {
            return Err(FusionError::InvalidInput(format!(
                "land mask shape {:?} does not match grid {}x{}",
                cells.dim(),
                ROWS,
                COLS
            )));
        }
        Ok(Self { cells: Some(cells) })
    }

    pub fn is_land(&self, cell: GridCell) -> bool {
        self.cells
            .as_ref()
            .map_or(true, |cells| cells[cell.index()])
    }

    pub fn land_cells(&self) -> usize {
        self.cells
            .as_ref()
            .map_or(ROWS * COLS, |cells| cells.iter().filter(|&&land| land).count())
    }

    pub(crate) fn is_land_at(&self, row: usize, col: usize) -> bool {
        self.cells.as_ref().map_or(true, |cells| cells[[row, col]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_land_counts_every_cell() {
        let mask = LandMask::all_land();
        assert_eq!(mask.land_cells(), ROWS * COLS);
        assert!(mask.is_land(GridCell::new(0, 0).unwrap()));
    }

    #[test]
    fn explicit_mask_must_match_grid_shape() {
        assert!(LandMask::from_array(Array2::from_elem((10, 10), true)).is_err());

        let mut cells = Array2::from_elem((ROWS, COLS), false);
        cells[[5, 7]] = true;
        let mask = LandMask::from_array(cells).unwrap();
        assert_eq!(mask.land_cells(), 1);
        assert!(mask.is_land(GridCell::new(5, 7).unwrap()));
        assert!(!mask.is_land(GridCell::new(5, 8).unwrap()));
    }
}
