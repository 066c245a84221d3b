//! JSON-lines ingestion of soundings and station observations.
//!
//! One JSON object per line; blank lines and lines starting with `#` are
//! skipped. A line that fails to decode or validate is dropped, logged and
//! tallied in the [`MetricsRecorder`]; only I/O failures abort a read.

use crate::grid::GridModel;
use crate::observation::{Ancillary, QualityFlag, Sensor, Sounding, StationObservation};
use crate::prelude::{FusionError, FusionResult};
use crate::telemetry::{LogManager, MetricsRecorder, RejectReason};
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::BufRead;

const DATE_FORMAT: &str = "%Y-%m-%d";
const MAX_PLAUSIBLE_PPB: f64 = 10_000.0;

#[derive(Debug, Deserialize)]
pub struct SoundingRecord {
    pub sensor: String,
    pub lat: f64,
    pub lon: f64,
    pub date: String,
    pub xch4: f64,
    #[serde(default)]
    pub quality: Option<QualityFlag>,
    #[serde(default)]
    pub albedo: Option<f64>,
    #[serde(default)]
    pub airmass: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct StationRecord {
    pub station_id: String,
    pub lat: f64,
    pub lon: f64,
    pub date: String,
    pub xch4: f64,
}

pub fn parse_sounding(line: &str) -> FusionResult<Sounding> {
    let record: SoundingRecord = serde_json::from_str(line)?;
    let sensor: Sensor = record.sensor.parse()?;
    let date = parse_date(&record.date)?;
    if !GridModel::contains(record.lat, record.lon) {
        return Err(FusionError::OutOfDomain {
            lat: record.lat,
            lon: record.lon,
        });
    }
    check_value(record.xch4)?;
    let mut sounding = Sounding::new(sensor, record.lat, record.lon, date, record.xch4).with_ancillary(Ancillary {
        albedo: record.albedo.filter(|v| v.is_finite()),
        airmass: record.airmass.filter(|v| v.is_finite()),
    });
    if let Some(quality) = record.quality {
        sounding = sounding.with_quality(quality);
    }
    Ok(sounding)
}

pub fn parse_station(line: &str) -> FusionResult<StationObservation> {
    let record: StationRecord = serde_json::from_str(line)?;
    if record.station_id.trim().is_empty() {
        return Err(FusionError::MalformedRecord("empty station_id".into()));
    }
    let date = parse_date(&record.date)?;
    check_position(record.lat, record.lon)?;
    check_value(record.xch4)?;
    Ok(StationObservation::new(
        record.station_id,
        record.lat,
        record.lon,
        date,
        record.xch4,
    ))
}

pub fn read_soundings<R: BufRead>(reader: R, metrics: &MetricsRecorder) -> FusionResult<Vec<Sounding>> {
    read_lines(reader, metrics, &LogManager::new("ingest").scoped("soundings"), parse_sounding)
}

pub fn read_stations<R: BufRead>(reader: R, metrics: &MetricsRecorder) -> FusionResult<Vec<StationObservation>> {
    read_lines(reader, metrics, &LogManager::new("ingest").scoped("stations"), parse_station)
}

/// Maps a per-record failure onto the tally it is counted under.
pub fn reason_for(err: &FusionError) -> RejectReason {
    match err {
        FusionError::OutOfDomain { .. } => RejectReason::OutOfDomain,
        FusionError::ImplausibleValue(_) => RejectReason::ImplausibleValue,
        FusionError::ModelUnavailable { .. } => RejectReason::NoUsableModel,
        _ => RejectReason::Malformed,
    }
}

fn read_lines<R, T, F>(reader: R, metrics: &MetricsRecorder, logger: &LogManager, parse: F) -> FusionResult<Vec<T>>
where
    R: BufRead,
    F: Fn(&str) -> FusionResult<T>,
{
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse(trimmed) {
            Ok(record) => {
                metrics.record_accepted();
                records.push(record);
            }
            Err(err) => {
                logger.warn(&format!("line {}: {}", index + 1, err));
                metrics.record_rejected(reason_for(&err));
            }
        }
    }
    logger.record(&format!("read {} records", records.len()));
    Ok(records)
}

fn parse_date(raw: &str) -> FusionResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|err| FusionError::MalformedRecord(format!("bad date {:?}: {}", raw, err)))
}

// Stations may sit poleward of the grid; they just never collocate there.
fn check_position(lat: f64, lon: f64) -> FusionResult<()> {
    if lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(FusionError::OutOfDomain { lat, lon })
    }
}

fn check_value(xch4: f64) -> FusionResult<()> {
    if xch4.is_finite() && xch4 > 0.0 && xch4 < MAX_PLAUSIBLE_PPB {
        Ok(())
    } else {
        Err(FusionError::ImplausibleValue(xch4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_full_sounding_line() {
        let line = r#"{"sensor":"GOSAT-2","lat":35.2,"lon":-97.5,"date":"2021-03-04","xch4":1893.4,"quality":"suspect","albedo":0.21}"#;
        let sounding = parse_sounding(line).unwrap();
        assert_eq!(sounding.sensor, Sensor::Gosat2);
        assert_eq!(sounding.date, NaiveDate::from_ymd_opt(2021, 3, 4).unwrap());
        assert_eq!(sounding.quality, Some(QualityFlag::Suspect));
        assert_eq!(sounding.ancillary.albedo, Some(0.21));
        assert_eq!(sounding.ancillary.airmass, None);
    }

    #[test]
    fn rejects_each_kind_of_bad_record() {
        let unknown = r#"{"sensor":"OCO-2","lat":0.0,"lon":0.0,"date":"2021-01-01","xch4":1850.0}"#;
        assert!(matches!(parse_sounding(unknown), Err(FusionError::MalformedRecord(_))));

        let poleward = r#"{"sensor":"GOSAT","lat":75.0,"lon":0.0,"date":"2021-01-01","xch4":1850.0}"#;
        assert!(matches!(parse_sounding(poleward), Err(FusionError::OutOfDomain { .. })));

        let negative = r#"{"station_id":"pa","lat":45.9,"lon":-90.3,"date":"2021-01-01","xch4":-1.0}"#;
        assert!(matches!(parse_station(negative), Err(FusionError::ImplausibleValue(_))));

        let bad_date = r#"{"station_id":"pa","lat":45.9,"lon":-90.3,"date":"01/02/2021","xch4":1850.0}"#;
        assert!(matches!(parse_station(bad_date), Err(FusionError::MalformedRecord(_))));

        assert!(matches!(parse_station("{not json"), Err(FusionError::Json(_))));
    }

    #[test]
    fn reader_skips_comments_and_tallies_rejections() {
        let input = "\
# station file
{\"station_id\":\"pa\",\"lat\":45.9,\"lon\":-90.3,\"date\":\"2021-01-01\",\"xch4\":1901.2}

{\"station_id\":\"pa\",\"lat\":45.9,\"lon\":-90.3,\"date\":\"2021-01-02\",\"xch4\":99999.0}
garbage
{\"station_id\":\"lm\",\"lat\":-12.4,\"lon\":130.9,\"date\":\"2021-01-02\",\"xch4\":1830.7}
";
        let metrics = MetricsRecorder::new();
        let stations = read_stations(Cursor::new(input), &metrics).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[1].station_id, "lm");

        let summary = metrics.snapshot();
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected.get(&RejectReason::ImplausibleValue), Some(&1));
        assert_eq!(summary.rejected.get(&RejectReason::Malformed), Some(&1));
        assert_eq!(summary.total_rejected(), 2);
    }
}
