use serde::Serialize;

/// Fields picked out of an extracted lab-report text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabReport {
    pub patient_name: Option<String>,
    pub gender: Option<String>,
    pub age: Option<String>,
    pub recorded_at: Option<String>,
    pub blood_pressure: Option<String>,
    pub sugar_level: Option<String>,
    pub thyroid: Option<String>,
}

impl LabReport {
    pub fn is_empty(&self) -> bool {
        *self == LabReport::default()
    }
}

fn value_after_last_colon(line: &str) -> Option<String> {
    let v = line.rsplit(':').next()?.trim();
    (!v.is_empty()).then(|| v.to_string())
}

/// Timestamps contain colons themselves, so only the first `": "` splits.
fn value_after_first_separator(line: &str) -> Option<String> {
    let v = match line.split_once(": ") {
        Some((_, rest)) => rest.trim(),
        None => line.rsplit(':').next()?.trim(),
    };
    (!v.is_empty()).then(|| v.to_string())
}

/// Line-oriented parse. Labels match case-insensitively; the first label
/// found on a line wins and later lines overwrite earlier values.
pub fn parse(text: &str) -> LabReport {
    let mut report = LabReport::default();

    for line in text.lines() {
        let lower = line.to_lowercase();
        if lower.contains("patient name:") {
            report.patient_name = value_after_last_colon(line).or(report.patient_name);
        } else if lower.contains("gender:") {
            report.gender = value_after_last_colon(line).or(report.gender);
        } else if lower.contains("age:") {
            report.age = value_after_last_colon(line).or(report.age);
        } else if lower.contains("date and time") {
            report.recorded_at = value_after_first_separator(line).or(report.recorded_at);
        } else if lower.contains("blood pressure:") {
            report.blood_pressure = value_after_last_colon(line).or(report.blood_pressure);
        } else if lower.contains("sugar level:") {
            report.sugar_level = value_after_last_colon(line).or(report.sugar_level);
        } else if lower.contains("thyroid:") {
            report.thyroid = value_after_last_colon(line).or(report.thyroid);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
CITY DIAGNOSTICS
Patient Name: Ada Obi
Gender: Female
Age: 34
Date and Time: 2024-03-01 09:45:12
Blood Pressure: 120/80
Sugar Level: 98 mg/dL
Thyroid: Normal
";

    #[test]
    fn parses_every_known_field() {
        let r = parse(SAMPLE);
        assert_eq!(r.patient_name.as_deref(), Some("Ada Obi"));
        assert_eq!(r.gender.as_deref(), Some("Female"));
        assert_eq!(r.age.as_deref(), Some("34"));
        assert_eq!(r.recorded_at.as_deref(), Some("2024-03-01 09:45:12"));
        assert_eq!(r.blood_pressure.as_deref(), Some("120/80"));
        assert_eq!(r.sugar_level.as_deref(), Some("98 mg/dL"));
        assert_eq!(r.thyroid.as_deref(), Some("Normal"));
    }

    #[test]
    fn labels_are_case_insensitive() {
        let r = parse("BLOOD PRESSURE: 130/85\nsugar level:110");
        assert_eq!(r.blood_pressure.as_deref(), Some("130/85"));
        assert_eq!(r.sugar_level.as_deref(), Some("110"));
        assert!(r.patient_name.is_none());
    }

    #[test]
    fn blank_values_do_not_clobber() {
        let r = parse("Age: 40\nAge:   ");
        assert_eq!(r.age.as_deref(), Some("40"));
    }

    #[test]
    fn unrelated_text_yields_empty_report() {
        assert!(parse("nothing to see\nhere").is_empty());
        assert!(!parse("Thyroid: low").is_empty());
    }
}
