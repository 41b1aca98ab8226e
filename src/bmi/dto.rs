use serde::{Deserialize, Serialize};

use super::repo::BmiRecord;
use super::services::Unit;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct CalculateRequest {
    pub height: Option<f64>,
    pub weight: Option<f64>,
    pub unit: Option<String>,
}

/// A request that passed validation.
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    pub height: f64,
    pub weight: f64,
    pub unit: Unit,
}

impl CalculateRequest {
    pub fn validate(self) -> AppResult<Measurement> {
        let (Some(height), Some(weight), Some(unit)) = (self.height, self.weight, self.unit) else {
            return Err(AppError::Validation("Incomplete input data".into()));
        };
        let unit = match unit.as_str() {
            "metric" => Unit::Metric,
            "imperial" => Unit::Imperial,
            _ => {
                return Err(AppError::Validation(
                    "Unit field should have value of metric or imperial".into(),
                ))
            }
        };
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(height) || !valid(weight) {
            return Err(AppError::Validation(
                "Height and weight must be positive numbers".into(),
            ));
        }
        Ok(Measurement {
            height,
            weight,
            unit,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CalculateResponse {
    pub bmi: f64,
    pub category: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub records: Vec<BmiRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(height: Option<f64>, weight: Option<f64>, unit: Option<&str>) -> CalculateRequest {
        CalculateRequest {
            height,
            weight,
            unit: unit.map(str::to_string),
        }
    }

    #[test]
    fn accepts_metric_and_imperial() {
        let m = req(Some(180.0), Some(81.0), Some("metric")).validate().unwrap();
        assert_eq!(m.unit, Unit::Metric);
        let m = req(Some(70.0), Some(160.0), Some("imperial")).validate().unwrap();
        assert_eq!(m.unit, Unit::Imperial);
    }

    #[test]
    fn rejects_incomplete_bad_unit_and_non_positive() {
        assert!(req(None, Some(81.0), Some("metric")).validate().is_err());
        assert!(req(Some(180.0), Some(81.0), Some("stone")).validate().is_err());
        assert!(req(Some(0.0), Some(81.0), Some("metric")).validate().is_err());
        assert!(req(Some(180.0), Some(-3.0), Some("metric")).validate().is_err());
        assert!(req(Some(f64::INFINITY), Some(81.0), Some("metric"))
            .validate()
            .is_err());
    }
}
