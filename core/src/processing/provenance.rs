use crate::grid::{GridCell, LandMask};
use crate::observation::Sensor;
use crate::processing::fusion::DailyGrid;
use crate::processing::monthly::MonthlyGrid;
use ndarray::{ArrayView2, Zip};
use serde::Serialize;
use std::collections::BTreeMap;

/// Read-only access to per-cell provenance of a fused product.
pub trait ProvenanceSource {
    fn sources(&self) -> ArrayView2<'_, Option<Sensor>>;

    fn source_of(&self, cell: GridCell) -> Option<Sensor> {
        self.sources()[cell.index()]
    }
}

impl ProvenanceSource for DailyGrid {
    fn sources(&self) -> ArrayView2<'_, Option<Sensor>> {
        self.provenance()
    }
}

impl ProvenanceSource for MonthlyGrid {
    fn sources(&self) -> ArrayView2<'_, Option<Sensor>> {
        self.dominant_source()
    }
}

/// Land-cell fill counts per contributing sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageStats {
    pub land_cells: usize,
    pub filled_cells: usize,
    pub by_sensor: BTreeMap<Sensor, usize>,
}

impl CoverageStats {
    pub fn filled_fraction(&self) -> f64 {
        ratio(self.filled_cells, self.land_cells)
    }

    /// Fraction of land cells filled by `sensor`.
    pub fn fraction(&self, sensor: Sensor) -> f64 {
        ratio(self.by_sensor.get(&sensor).copied().unwrap_or(0), self.land_cells)
    }

    pub fn fractions(&self) -> BTreeMap<Sensor, f64> {
        Sensor::ALL.iter().map(|&s| (s, self.fraction(s))).collect()
    }
}

fn ratio(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

pub struct ProvenanceTracker;

impl ProvenanceTracker {
    pub fn coverage<P>(grid: &P, land: &LandMask) -> CoverageStats
    where
        P: ProvenanceSource + ?Sized,
    {
        let mut by_sensor: BTreeMap<Sensor, usize> = Sensor::ALL.iter().map(|&s| (s, 0)).collect();
        let mut filled_cells = 0;
        Zip::indexed(grid.sources()).for_each(|(row, col), source| {
            if let Some(sensor) = source {
                if land.is_land_at(row, col) {
                    filled_cells += 1;
                    *by_sensor.entry(*sensor).or_insert(0) += 1;
                }
            }
        });
        CoverageStats {
            land_cells: land.land_cells(),
            filled_cells,
            by_sensor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridModel, COLS, ROWS};
    use crate::prelude::FusionConfig;
    use crate::processing::fusion::tests::{day, harmonized};
    use crate::processing::fusion::FusionEngine;
    use ndarray::Array2;
    use std::sync::Arc;

    #[test]
    fn source_of_reports_contributing_sensor() {
        let engine = FusionEngine::new(&FusionConfig::default(), Arc::new(LandMask::all_land()));
        let soundings = vec![
            harmonized(Sensor::Gosat, 20.05, 20.05, day(1), 1850.0),
            harmonized(Sensor::Tropomi, 21.05, 20.05, day(1), 1851.0),
        ];
        let grid = engine.fuse_day(day(1), &soundings, None).unwrap();
        let gosat_cell = GridModel::cell_of(20.05, 20.05).unwrap();
        let empty_cell = GridModel::cell_of(22.05, 20.05).unwrap();
        assert_eq!(grid.source_of(gosat_cell), Some(Sensor::Gosat));
        assert_eq!(grid.source_of(empty_cell), None);
    }

    #[test]
    fn coverage_counts_land_cells_only() {
        let engine = FusionEngine::new(&FusionConfig::default(), Arc::new(LandMask::all_land()));
        let soundings = vec![
            harmonized(Sensor::Gosat2, 30.05, 30.05, day(2), 1850.0),
            harmonized(Sensor::Tropomi, 31.05, 30.05, day(2), 1850.0),
            harmonized(Sensor::Tropomi, -31.05, 30.05, day(2), 1850.0),
        ];
        let grid = engine.fuse_day(day(2), &soundings, None).unwrap();

        let mut cells = Array2::from_elem((ROWS, COLS), false);
        for (lat, lon) in [(30.05, 30.05), (31.05, 30.05), (0.05, 0.05), (1.05, 0.05)] {
            cells[GridModel::cell_of(lat, lon).unwrap().index()] = true;
        }
        let land = LandMask::from_array(cells).unwrap();
        let stats = ProvenanceTracker::coverage(&grid, &land);
        assert_eq!(stats.land_cells, 4);
        assert_eq!(stats.filled_cells, 2);
        assert_eq!(stats.by_sensor[&Sensor::Tropomi], 1);
        assert_eq!(stats.fraction(Sensor::Gosat2), 0.25);
        assert_eq!(stats.fraction(Sensor::Gosat), 0.0);
        assert_eq!(stats.filled_fraction(), 0.5);
    }
}
