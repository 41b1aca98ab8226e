//! BMI arithmetic and category tables.
//!
//! Categories depend on the user's age bracket, gender and country. Countries
//! without a dedicated table fall back to the WHO cut-offs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Height in centimetres, weight in kilograms.
    Metric,
    /// Height in inches, weight in pounds.
    Imperial,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Metric => "metric",
            Unit::Imperial => "imperial",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    under: f64,
    normal: f64,
    over: f64,
}

const fn t(under: f64, normal: f64, over: f64) -> Thresholds {
    Thresholds { under, normal, over }
}

const WHO_ADULT: Thresholds = t(18.5, 24.9, 29.9);
const WHO_OLDER: Thresholds = t(22.0, 27.0, 30.0);
const FEMALE_ADULT: Thresholds = t(18.5, 23.0, 28.0);
const FEMALE_OLDER: Thresholds = t(23.0, 28.0, 32.0);

/// (upper age bound, thresholds), checked in ascending order.
const CHILD_BRACKETS: [(i32, Thresholds); 3] = [
    (2, t(14.0, 16.0, 19.0)),
    (5, t(14.0, 17.0, 19.0)),
    (10, t(16.0, 20.0, 24.0)),
];

const ADULT_LABELS: [&str; 4] = ["Underweight", "Normal weight", "Overweight", "Obese"];
const CHILD_LABELS: [&str; 4] = ["Underweight", "Healthy weight", "Overweight", "Obese"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Country {
    Usa,
    Germany,
    Japan,
    Other,
}

fn country(name: &str) -> Country {
    match name.trim().to_ascii_lowercase().as_str() {
        "usa" | "us" | "united states" | "united states of america" => Country::Usa,
        "germany" | "deutschland" => Country::Germany,
        "japan" => Country::Japan,
        _ => Country::Other,
    }
}

fn classify(bmi: f64, th: Thresholds, labels: [&'static str; 4]) -> &'static str {
    if bmi < th.under {
        labels[0]
    } else if bmi < th.normal {
        labels[1]
    } else if bmi < th.over {
        labels[2]
    } else {
        labels[3]
    }
}

fn child_category(bmi: f64, age: i32, country: Country) -> &'static str {
    if matches!(country, Country::Usa | Country::Japan) {
        if let Some((_, th)) = CHILD_BRACKETS.iter().find(|(bound, _)| age < *bound) {
            return classify(bmi, *th, CHILD_LABELS);
        }
    }
    classify(bmi, WHO_ADULT, CHILD_LABELS)
}

fn older_category(bmi: f64, female: bool, country: Country) -> &'static str {
    let th = if female {
        FEMALE_OLDER
    } else {
        match country {
            Country::Germany => t(21.0, 26.0, 29.0),
            _ => WHO_OLDER,
        }
    };
    classify(bmi, th, ADULT_LABELS)
}

fn adult_category(bmi: f64, female: bool, country: Country) -> &'static str {
    let th = if female {
        FEMALE_ADULT
    } else {
        match country {
            Country::Germany => t(18.0, 23.0, 27.0),
            Country::Japan => t(18.5, 23.0, 27.5),
            Country::Usa | Country::Other => WHO_ADULT,
        }
    };
    classify(bmi, th, ADULT_LABELS)
}

/// Raw BMI rounded to two decimals.
pub fn compute_bmi(height: f64, weight: f64, unit: Unit) -> f64 {
    let raw = match unit {
        Unit::Metric => {
            let metres = height / 100.0;
            weight / (metres * metres)
        }
        Unit::Imperial => 703.0 * weight / (height * height),
    };
    (raw * 100.0).round() / 100.0
}

pub fn category(bmi: f64, age: i32, gender: &str, country_name: &str) -> &'static str {
    let female = gender.trim().eq_ignore_ascii_case("female");
    let country = country(country_name);
    if age < 20 {
        child_category(bmi, age, country)
    } else if age >= 65 {
        older_category(bmi, female, country)
    } else {
        adult_category(bmi, female, country)
    }
}
