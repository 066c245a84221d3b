use anyhow::{bail, Context};
use chrono::{Datelike, NaiveDate};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use xch4core::grid::{GridModel, LAT_MAX, LAT_MIN, LON_MAX, LON_MIN};
use xch4core::observation::{Ancillary, QualityFlag, Sensor, Sounding, StationObservation};

/// Error and sampling characteristics of one simulated sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorProfile {
    pub sensor: Sensor,
    /// Constant offset from truth, ppb.
    pub bias_ppb: f64,
    /// Extra bias per unit of albedo above 0.25, ppb.
    pub albedo_slope: f64,
    pub noise_ppb: f64,
    /// Soundings drawn next to each station per day.
    pub near_station: usize,
    /// Soundings drawn anywhere in the domain per day.
    pub background: usize,
    /// Probability that a sounding is flagged bad.
    pub bad_fraction: f64,
}

/// Configuration for generating a synthetic observing system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub seed: u64,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub stations: usize,
    pub station_noise_ppb: f64,
    pub sensors: Vec<SensorProfile>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            start: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2021, 1, 7).unwrap_or_default(),
            stations: 12,
            station_noise_ppb: 0.4,
            sensors: vec![
                SensorProfile {
                    sensor: Sensor::Gosat,
                    bias_ppb: -7.0,
                    albedo_slope: 12.0,
                    noise_ppb: 1.0,
                    near_station: 3,
                    background: 400,
                    bad_fraction: 0.02,
                },
                SensorProfile {
                    sensor: Sensor::Gosat2,
                    bias_ppb: 4.0,
                    albedo_slope: 6.0,
                    noise_ppb: 0.8,
                    near_station: 3,
                    background: 300,
                    bad_fraction: 0.02,
                },
                SensorProfile {
                    sensor: Sensor::Tropomi,
                    bias_ppb: 11.0,
                    albedo_slope: -8.0,
                    noise_ppb: 0.6,
                    near_station: 3,
                    background: 4000,
                    bad_fraction: 0.02,
                },
            ],
        }
    }
}

pub struct SyntheticWorld {
    pub soundings: Vec<Sounding>,
    pub stations: Vec<StationObservation>,
}

/// Smooth "true" XCH4 field (ppb) with a latitudinal gradient, a weak
/// longitudinal wave and a slow seasonal drift.
pub fn truth(lat: f64, lon: f64, date: NaiveDate) -> f64 {
    let doy = f64::from(date.ordinal());
    1880.0 + 25.0 * lat.to_radians().sin() + 6.0 * lon.to_radians().cos() * lat.to_radians().cos() + 0.15 * doy
}

/// Station sites sit on grid-cell centres so that soundings scattered less
/// than half a cell around them share the station's cell.
fn station_sites(count: usize, rng: &mut StdRng) -> anyhow::Result<Vec<(String, f64, f64)>> {
    let mut sites = Vec::with_capacity(count);
    for index in 0..count {
        let lat = rng.gen_range(LAT_MIN + 1.0..LAT_MAX - 1.0);
        let lon = rng.gen_range(LON_MIN + 1.0..LON_MAX - 1.0);
        let cell = GridModel::cell_of(lat, lon).context("placing synthetic station")?;
        let (clat, clon) = GridModel::center_of(cell);
        sites.push((format!("syn{:03}", index), clat, clon));
    }
    Ok(sites)
}

fn draw_sounding(profile: &SensorProfile, lat: f64, lon: f64, date: NaiveDate, rng: &mut StdRng) -> Sounding {
    let albedo = rng.gen_range(0.05..0.5);
    let airmass = rng.gen_range(2.0..3.5);
    let raw = truth(lat, lon, date)
        + profile.bias_ppb
        + profile.albedo_slope * (albedo - 0.25)
        + rng.gen_range(-profile.noise_ppb..=profile.noise_ppb);
    let quality = if rng.gen_bool(profile.bad_fraction.clamp(0.0, 1.0)) {
        QualityFlag::Bad
    } else {
        QualityFlag::Good
    };
    Sounding::new(profile.sensor, lat, lon, date, raw)
        .with_quality(quality)
        .with_ancillary(Ancillary {
            albedo: Some(albedo),
            airmass: Some(airmass),
        })
}

pub fn generate(config: &GeneratorConfig) -> anyhow::Result<SyntheticWorld> {
    if config.end < config.start {
        bail!("generator ends ({}) before it starts ({})", config.end, config.start);
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    let sites = station_sites(config.stations, &mut rng)?;
    let mut soundings = Vec::new();
    let mut stations = Vec::new();

    for date in config.start.iter_days().take_while(|d| *d <= config.end) {
        for (id, lat, lon) in &sites {
            let value = truth(*lat, *lon, date)
                + rng.gen_range(-config.station_noise_ppb..=config.station_noise_ppb);
            stations.push(StationObservation::new(id.clone(), *lat, *lon, date, value));
        }
        for profile in &config.sensors {
            for (_, lat, lon) in &sites {
                for _ in 0..profile.near_station {
                    let slat = lat + rng.gen_range(-0.04..0.04);
                    let slon = lon + rng.gen_range(-0.04..0.04);
                    soundings.push(draw_sounding(profile, slat, slon, date, &mut rng));
                }
            }
            for _ in 0..profile.background {
                let lat = rng.gen_range(LAT_MIN..LAT_MAX);
                let lon = rng.gen_range(LON_MIN..LON_MAX);
                soundings.push(draw_sounding(profile, lat, lon, date, &mut rng));
            }
        }
    }

    log::info!(
        "generated {} soundings and {} station observations from seed {}",
        soundings.len(),
        stations.len(),
        config.seed
    );
    Ok(SyntheticWorld { soundings, stations })
}
