use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StudentRecord {
    #[serde(rename = "rollNo")]
    pub roll_number: String,
    pub name: String,
    #[serde(rename = "fatherName")]
    pub fathers_name: String,
    pub branch: String,
    #[serde(rename = "branchChanged")]
    pub branch_changed: bool,
    pub batch: u16,
    pub programme: String,
    pub semesters: Vec<SemesterRecord>,
    pub cgpi: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SemesterRecord {
    #[serde(rename = "semesterNo")]
    pub semester_number: u32,
    pub courses: Vec<CourseRecord>,
    pub sgpi: f64,
    pub cgpi: f64,
    #[serde(rename = "sgpiTotal")]
    pub sgpi_total: Option<f64>,
    #[serde(rename = "cgpiTotal")]
    pub cgpi_total: Option<f64>,
    /// Set on semesters read from the dual-degree scheme.
    #[serde(rename = "dualDegree", default)]
    pub dual_degree: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CourseRecord {
    pub name: String,
    pub code: String,
    pub credit: u32,
    pub grade: String,
    pub points: u32,
    /// points / credit; `None` when the course carries no credit.
    pub cgpi: Option<f64>,
}

impl CourseRecord {
    // Builds a course and its points-per-credit contribution.
    pub fn new(name: String, code: String, credit: u32, grade: String, points: u32) -> Self {
        let cgpi = (credit != 0).then(|| points as f64 / credit as f64);
        CourseRecord { name, code, credit, grade, points, cgpi }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Scraped,
    NotFound,
    Failed,
}

/// One entry of a bulk run. `data` and `error` are never both set.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ScrapeOutcome {
    #[serde(rename = "rollNumber")]
    pub roll_number: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<StudentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScrapeOutcome {
    // Successful outcome carrying the record.
    pub fn scraped(roll_number: String, record: StudentRecord) -> Self {
        ScrapeOutcome { roll_number, status: OutcomeStatus::Scraped, data: Some(record), error: None }
    }

    // Roll number the portal does not know.
    pub fn not_found(roll_number: String) -> Self {
        ScrapeOutcome { roll_number, status: OutcomeStatus::NotFound, data: None, error: None }
    }

    // Outcome of a roll number that gave up.
    pub fn failed(roll_number: String, error: String) -> Self {
        ScrapeOutcome { roll_number, status: OutcomeStatus::Failed, data: None, error: Some(error) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_contribution_is_points_over_credit() {
        let course = CourseRecord::new("Maths".into(), "MA-101".into(), 4, "A".into(), 36);
        assert_eq!(course.cgpi, Some(9.0));
    }

    #[test]
    fn zero_credit_course_has_no_contribution() {
        let course = CourseRecord::new("Seminar".into(), "HS-100".into(), 0, "S".into(), 0);
        assert_eq!(course.cgpi, None);
        let json = serde_json::to_value(&course).unwrap();
        assert!(json["cgpi"].is_null());
    }

    #[test]
    fn not_found_outcome_serializes_without_error() {
        let json = serde_json::to_value(ScrapeOutcome::not_found("21bcs001".into())).unwrap();
        assert_eq!(json["status"], "not_found");
        assert!(json.get("error").is_none());
        assert!(json.get("data").is_none());
    }
}
