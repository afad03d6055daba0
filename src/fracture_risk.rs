//! Absolute fracture risk from a Cox proportional hazards model (the `GARVAN` covariate).
//!
//! Risk is `1 - S0(t) ^ exp(lp)` where `S0(t)` is the baseline survival over the estimation period
//! and `lp` the centred linear predictor. BMD is used when known, otherwise body weight.
//!
//! The default coefficients are placeholders of the right order of magnitude. Studies using this
//! covariate should supply calibrated values in the `[fracture_risk]` configuration section.
use crate::{ArcStr, Sex};
use serde::{Deserialize, Serialize};

/// Measurement codes to read the model inputs from, and the per-sex models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractureRiskConfig {
    pub weight_code: ArcStr,
    /// T-score.
    pub bmd_code: ArcStr,
    /// Number of falls in the last year.
    pub falls_code: ArcStr,
    /// Number of fractures since the age of 50.
    pub fractures_code: ArcStr,
    pub female: CoxModel,
    pub male: CoxModel,
}

impl Default for FractureRiskConfig {
    fn default() -> Self {
        Self {
            weight_code: "WEIGHT".into(),
            bmd_code: "BMD".into(),
            falls_code: "FALLS".into(),
            fractures_code: "FRACTURES".into(),
            female: CoxModel {
                age: 0.064,
                weight: -0.017,
                bmd: -0.34,
                falls: [0.18, 0.41, 0.69],
                fractures: [0.47, 0.69, 1.10],
                mean_age: 70.,
                mean_weight: 70.,
                mean_bmd: -1.,
                survival_5y: 0.95,
                survival_10y: 0.88,
            },
            male: CoxModel {
                age: 0.058,
                weight: -0.015,
                bmd: -0.42,
                falls: [0.18, 0.41, 0.69],
                fractures: [0.53, 0.79, 1.16],
                mean_age: 70.,
                mean_weight: 80.,
                mean_bmd: -0.5,
                survival_5y: 0.97,
                survival_10y: 0.93,
            },
        }
    }
}

/// Log hazard ratios and baseline survival for one sex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoxModel {
    /// Per year of age.
    pub age: f64,
    /// Per kg.
    pub weight: f64,
    /// Per unit of T-score.
    pub bmd: f64,
    /// For 1, 2 and 3 or more falls.
    pub falls: [f64; 3],
    /// For 1, 2 and 3 or more prior fractures.
    pub fractures: [f64; 3],
    pub mean_age: f64,
    pub mean_weight: f64,
    pub mean_bmd: f64,
    pub survival_5y: f64,
    pub survival_10y: f64,
}

impl CoxModel {
    fn linear_predictor(&self, inputs: &FractureRiskInputs) -> Option<f64> {
        let body = match (inputs.bmd, inputs.weight) {
            (Some(bmd), _) => self.bmd * (bmd - self.mean_bmd),
            (None, Some(weight)) => self.weight * (weight - self.mean_weight),
            (None, None) => return None,
        };
        Some(
            self.age * (inputs.age - self.mean_age)
                + body
                + category(&self.falls, inputs.falls)
                + category(&self.fractures, inputs.fractures),
        )
    }

    fn baseline_survival(&self, period_years: u32) -> f64 {
        if period_years <= 5 {
            self.survival_5y
        } else {
            self.survival_10y
        }
    }
}

fn category(coefficients: &[f64; 3], count: u32) -> f64 {
    match count {
        0 => 0.,
        1 => coefficients[0],
        2 => coefficients[1],
        _ => coefficients[2],
    }
}

/// Everything the model needs for one patient at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct FractureRiskInputs {
    /// Age in years.
    pub age: f64,
    pub sex: Sex,
    pub weight: Option<f64>,
    pub bmd: Option<f64>,
    pub falls: u32,
    pub fractures: u32,
    /// 5 or 10.
    pub period_years: u32,
}

/// The probability of a fracture within the period, or `None` if neither BMD nor weight is known.
pub fn estimate(config: &FractureRiskConfig, inputs: &FractureRiskInputs) -> Option<f64> {
    let model = match inputs.sex {
        Sex::Female => &config.female,
        Sex::Male => &config.male,
    };
    let lp = model.linear_predictor(inputs)?;
    let risk = 1. - model.baseline_survival(inputs.period_years).powf(lp.exp());
    if risk.is_finite() {
        Some(risk.clamp(0., 1.))
    } else {
        None
    }
}
