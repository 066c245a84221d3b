use super::Located;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Ground-truth column measurement from a reference station (e.g. TCCON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationObservation {
    pub station_id: String,
    pub lat: f64,
    pub lon: f64,
    pub date: NaiveDate,
    pub xch4: f64,
}

impl StationObservation {
    pub fn new(station_id: impl Into<String>, lat: f64, lon: f64, date: NaiveDate, xch4: f64) -> Self {
        Self {
            station_id: station_id.into(),
            lat,
            lon,
            date,
            xch4,
        }
    }
}

impl Located for StationObservation {
    fn lat(&self) -> f64 {
        self.lat
    }

    fn lon(&self) -> f64 {
        self.lon
    }

    fn date(&self) -> NaiveDate {
        self.date
    }
}
