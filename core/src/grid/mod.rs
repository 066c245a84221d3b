pub mod mask;
pub mod model;
pub mod region;

pub use mask::LandMask;
pub use model::{GridCell, GridModel, COLS, LAT_MAX, LAT_MIN, LON_MAX, LON_MIN, RESOLUTION_DEG, ROWS};
pub use region::{FieldSummary, Region};
