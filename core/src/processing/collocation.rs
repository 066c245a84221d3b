use crate::observation::Located;
use crate::prelude::CollocationTolerance;
use chrono::{Days, NaiveDate};
use std::collections::HashMap;

const MIN_BUCKET_DEG: f64 = 0.01;

/// A target observation matched to its nearest reference within tolerance.
#[derive(Debug, Clone, Copy)]
pub struct Collocation<'a, A, B> {
    pub target: &'a A,
    pub reference: &'a B,
    pub day_offset: u32,
    pub separation_deg: f64,
}

/// Spatiotemporal matcher backed by a (date, lat bucket, lon bucket) index.
#[derive(Debug, Clone, Copy)]
pub struct Collocator {
    tolerance: CollocationTolerance,
}

type BucketKey = (NaiveDate, i64, i64);

impl Collocator {
    pub fn new(tolerance: CollocationTolerance) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> CollocationTolerance {
        self.tolerance
    }

    /// Pairs every target with its closest reference: fewest days apart, then
    /// smallest separation, then earliest reference. Targets with no
    /// reference inside the window are left out.
    pub fn pairs<'a, A, B>(&self, targets: &[&'a A], references: &[&'a B]) -> Vec<Collocation<'a, A, B>>
    where
        A: Located,
        B: Located,
    {
        let bucket_deg = self.tolerance.spatial_deg.max(MIN_BUCKET_DEG);
        // Longitude buckets tile the full circle evenly and are never
        // narrower than the tolerance.
        let lon_buckets = (360.0 / bucket_deg).floor().max(1.0) as i64;
        let lon_bucket_deg = 360.0 / lon_buckets as f64;
        let bucket = |lat: f64, lon: f64| {
            (
                (lat / bucket_deg).floor() as i64,
                ((lon + 180.0) / lon_bucket_deg).floor().rem_euclid(lon_buckets as f64) as i64,
            )
        };

        let mut index: HashMap<BucketKey, Vec<usize>> = HashMap::new();
        for (idx, reference) in references.iter().enumerate() {
            let (lat_b, lon_b) = bucket(reference.lat(), reference.lon());
            index
                .entry((reference.date(), lat_b, lon_b))
                .or_default()
                .push(idx);
        }

        let mut matches = Vec::new();
        for &target in targets {
            let (lat_b, lon_b) = bucket(target.lat(), target.lon());
            let mut best: Option<(u32, f64, usize)> = None;

            for (day_offset, date) in self.candidate_dates(target.date()) {
                for dlat in -1..=1 {
                    for dlon in -1..=1 {
                        let key = (date, lat_b + dlat, (lon_b + dlon).rem_euclid(lon_buckets));
                        let Some(candidates) = index.get(&key) else {
                            continue;
                        };
                        for &idx in candidates {
                            let reference = references[idx];
                            let lat_sep = (reference.lat() - target.lat()).abs();
                            let lon_sep = lon_separation(reference.lon(), target.lon());
                            let tolerance = self.tolerance.spatial_deg;
                            if !(lat_sep <= tolerance && lon_sep <= tolerance) {
                                continue;
                            }
                            let separation = lat_sep.hypot(lon_sep);
                            let better = match best {
                                None => true,
                                Some((best_day, best_sep, best_idx)) => {
                                    (day_offset, separation, idx) < (best_day, best_sep, best_idx)
                                }
                            };
                            if better {
                                best = Some((day_offset, separation, idx));
                            }
                        }
                    }
                }
            }

            if let Some((day_offset, separation_deg, idx)) = best {
                matches.push(Collocation {
                    target,
                    reference: references[idx],
                    day_offset,
                    separation_deg,
                });
            }
        }
        matches
    }

    fn candidate_dates(&self, date: NaiveDate) -> Vec<(u32, NaiveDate)> {
        let mut dates = vec![(0, date)];
        for offset in 1..=self.tolerance.max_day_offset {
            let days = Days::new(u64::from(offset));
            dates.extend(date.checked_sub_days(days).map(|d| (offset, d)));
            dates.extend(date.checked_add_days(days).map(|d| (offset, d)));
        }
        dates
    }
}

fn lon_separation(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    diff.min(360.0 - diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{Sensor, Sounding, StationObservation};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, d).unwrap()
    }

    #[test]
    fn nearest_station_within_tolerance_is_chosen() {
        let soundings = [Sounding::new(Sensor::Gosat, 10.02, 20.02, day(1), 1850.0)];
        let stations = [
            StationObservation::new("far", 10.09, 20.09, day(1), 1845.0),
            StationObservation::new("near", 10.0, 20.0, day(1), 1846.0),
            StationObservation::new("other-day", 10.02, 20.02, day(2), 1847.0),
        ];
        let targets: Vec<_> = soundings.iter().collect();
        let references: Vec<_> = stations.iter().collect();
        let pairs = Collocator::new(CollocationTolerance::default()).pairs(&targets, &references);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].reference.station_id, "near");
        assert_eq!(pairs[0].day_offset, 0);
    }

    #[test]
    fn day_offset_widens_the_window() {
        let soundings = [Sounding::new(Sensor::Tropomi, 0.0, 0.0, day(5), 1850.0)];
        let stations = [StationObservation::new("s", 0.0, 0.0, day(4), 1846.0)];
        let targets: Vec<_> = soundings.iter().collect();
        let references: Vec<_> = stations.iter().collect();

        let same_day = Collocator::new(CollocationTolerance::default());
        assert!(same_day.pairs(&targets, &references).is_empty());

        let one_day = Collocator::new(CollocationTolerance {
            spatial_deg: 0.1,
            max_day_offset: 1,
        });
        let pairs = one_day.pairs(&targets, &references);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].day_offset, 1);
    }

    #[test]
    fn matching_wraps_across_the_antimeridian() {
        let soundings = [Sounding::new(Sensor::Gosat2, 5.0, -179.97, day(1), 1850.0)];
        let stations = [StationObservation::new("dateline", 5.0, 179.98, day(1), 1846.0)];
        let targets: Vec<_> = soundings.iter().collect();
        let references: Vec<_> = stations.iter().collect();
        let pairs = Collocator::new(CollocationTolerance::default()).pairs(&targets, &references);
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].separation_deg < 0.06);
    }

    #[test]
    fn uneven_tolerance_still_wraps_across_the_antimeridian() {
        let soundings = [Sounding::new(Sensor::Gosat, 5.0, -180.0, day(1), 1850.0)];
        let stations = [StationObservation::new("dateline", 5.0, 179.939, day(1), 1846.0)];
        let targets: Vec<_> = soundings.iter().collect();
        let references: Vec<_> = stations.iter().collect();
        let pairs = Collocator::new(CollocationTolerance {
            spatial_deg: 0.07,
            max_day_offset: 0,
        })
        .pairs(&targets, &references);
        assert_eq!(pairs.len(), 1);
        assert!((pairs[0].separation_deg - 0.061).abs() < 1e-6);
    }

    #[test]
    fn non_finite_positions_never_match() {
        let soundings = [
            Sounding::new(Sensor::Tropomi, f64::NAN, 20.0, day(1), 1850.0),
            Sounding::new(Sensor::Tropomi, 0.05, f64::INFINITY, day(1), 1850.0),
        ];
        let stations = [StationObservation::new("s", 0.05, 20.0, day(1), 1846.0)];
        let targets: Vec<_> = soundings.iter().collect();
        let references: Vec<_> = stations.iter().collect();
        let pairs = Collocator::new(CollocationTolerance::default()).pairs(&targets, &references);
        assert!(pairs.is_empty());
    }
}
