use crate::sample::TimingSample;
use std::{collections::BTreeMap, fmt};

/// query ordinal -> durations in insertion order
pub type QueryGroups = BTreeMap<usize, Vec<f64>>;

/// Split the durations of a run by query ordinal in a single pass
pub fn group_by_query(samples: &[TimingSample]) -> QueryGroups {
    samples
        .iter()
        .fold(QueryGroups::new(), |mut groups, sample| {
            groups
                .entry(sample.query_num)
                .or_default()
                .push(sample.duration_ms);

            groups
        })
}

/// Descriptive statistics of one group of durations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// sample standard deviation, NaN for a single value
    pub std_dev: f64,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
}

impl Summary {
    pub fn describe(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;
        let std_dev = if count > 1 {
            let squares = sorted
                .iter()
                .map(|value| (value - mean).powi(2))
                .sum::<f64>();

            (squares / (count - 1) as f64).sqrt()
        } else {
            f64::NAN
        };

        Some(Self {
            count,
            mean,
            std_dev,
            min: sorted[0],
            p25: quantile(&sorted, 0.25),
            p50: quantile(&sorted, 0.5),
            p75: quantile(&sorted, 0.75),
            max: sorted[count - 1],
        })
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Count: {}", self.count)?;
        writeln!(f, "Mean: {:.2}ms", self.mean)?;
        writeln!(f, "Std Dev: {:.2}ms", self.std_dev)?;
        writeln!(f, "Min: {:.2}ms", self.min)?;
        writeln!(f, "25%: {:.2}ms", self.p25)?;
        writeln!(f, "50%: {:.2}ms", self.p50)?;
        writeln!(f, "75%: {:.2}ms", self.p75)?;
        write!(f, "Max: {:.2}ms", self.max)
    }
}

/// linear interpolation between the closest ranks, `sorted` must not be empty
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;

    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}
