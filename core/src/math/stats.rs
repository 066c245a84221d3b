pub struct StatsHelper;

impl StatsHelper {
    pub fn mean(samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Root-mean-square difference between paired predictions and observations.
    pub fn rmse(predicted: &[f64], observed: &[f64]) -> Option<f64> {
        if predicted.is_empty() || predicted.len() != observed.len() {
            return None;
        }
        let sum_sq: f64 = predicted
            .iter()
            .zip(observed)
            .map(|(p, o)| (p - o) * (p - o))
            .sum();
        Some((sum_sq / predicted.len() as f64).sqrt())
    }

    /// Coefficient of determination of `predicted` against `observed`.
    pub fn r_squared(predicted: &[f64], observed: &[f64]) -> Option<f64> {
        if predicted.is_empty() || predicted.len() != observed.len() {
            return None;
        }
        let mean = Self::mean(observed)?;
        let ss_tot: f64 = observed.iter().map(|o| (o - mean) * (o - mean)).sum();
        let ss_res: f64 = predicted
            .iter()
            .zip(observed)
            .map(|(p, o)| (o - p) * (o - p))
            .sum();
        if ss_tot == 0.0 {
            return Some(if ss_res == 0.0 { 1.0 } else { 0.0 });
        }
        Some(1.0 - ss_res / ss_tot)
    }
}
