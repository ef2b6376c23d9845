use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RrdError;

/// Consolidation function applied when finer points are rolled into a coarser tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Average,
    Sum,
    Last,
    Max,
    Min,
}

impl Aggregation {
    /// Consolidate known values; `None` when there is nothing to consolidate.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        let (first, rest) = values.split_first()?;
        Some(match self {
            Aggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Last => *values.last().unwrap_or(first),
            Aggregation::Max => rest.iter().copied().fold(*first, f64::max),
            Aggregation::Min => rest.iter().copied().fold(*first, f64::min),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Average => "average",
            Aggregation::Sum => "sum",
            Aggregation::Last => "last",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
        }
    }

    pub(crate) fn code(self) -> u32 {
        match self {
            Aggregation::Average => 1,
            Aggregation::Sum => 2,
            Aggregation::Last => 3,
            Aggregation::Max => 4,
            Aggregation::Min => 5,
        }
    }

    pub(crate) fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Aggregation::Average,
            2 => Aggregation::Sum,
            3 => Aggregation::Last,
            4 => Aggregation::Max,
            5 => Aggregation::Min,
            _ => return None,
        })
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = RrdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" | "avg" | "mean" => Ok(Aggregation::Average),
            "sum" => Ok(Aggregation::Sum),
            "last" => Ok(Aggregation::Last),
            "max" => Ok(Aggregation::Max),
            "min" => Ok(Aggregation::Min),
            other => Err(RrdError::UnknownAggregation(other.to_string())),
        }
    }
}
