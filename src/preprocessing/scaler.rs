//! Fitted numeric scalers

use crate::error::Result;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Which scaling a field uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerType {
    /// Min-Max scaling: (x - min) / (max - min)
    MinMax,
    /// Robust scaling using median and IQR
    Robust,
}

/// A scaler together with the parameters learned at fit time.
///
/// Parameters are never re-estimated at transform time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FittedScaler {
    MinMax { min: f64, range: f64 },
    Robust { center: f64, iqr: f64 },
}

impl FittedScaler {
    /// Fit a scaler of `scaler_type` on observed values
    pub fn fit(scaler_type: ScalerType, values: &[f64]) -> Result<Self> {
        let ca = Float64Chunked::from_vec("values".into(), values.to_vec());

        match scaler_type {
            ScalerType::MinMax => {
                let min = ca.min().unwrap_or(0.0);
                let max = ca.max().unwrap_or(1.0);
                let range = max - min;
                Ok(FittedScaler::MinMax {
                    min,
                    range: if range == 0.0 { 1.0 } else { range },
                })
            }
            ScalerType::Robust => {
                let median = ca.median().unwrap_or(0.0);
                let q1 = ca.quantile(0.25, QuantileMethod::Linear)?.unwrap_or(0.0);
                let q3 = ca.quantile(0.75, QuantileMethod::Linear)?.unwrap_or(1.0);
                let iqr = q3 - q1;
                Ok(FittedScaler::Robust {
                    center: median,
                    iqr: if iqr == 0.0 { 1.0 } else { iqr },
                })
            }
        }
    }

    pub fn scaler_type(&self) -> ScalerType {
        match self {
            FittedScaler::MinMax { .. } => ScalerType::MinMax,
            FittedScaler::Robust { .. } => ScalerType::Robust,
        }
    }

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        match *self {
            FittedScaler::MinMax { min, range } => (value - min) / range,
            FittedScaler::Robust { center, iqr } => (value - center) / iqr,
        }
    }

    #[inline]
    pub fn invert(&self, value: f64) -> f64 {
        match *self {
            FittedScaler::MinMax { min, range } => value * range + min,
            FittedScaler::Robust { center, iqr } => value * iqr + center,
        }
    }
}

/// Median of observed values (mean of the two middle values for even counts)
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    Float64Chunked::from_vec("values".into(), values.to_vec()).median()
}
