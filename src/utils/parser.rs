use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use log::debug;
use scraper::{ElementRef, Html, Selector};

use crate::errors::ScrapeError;
use crate::models::{CourseRecord, SemesterRecord, StudentRecord};
use crate::utils::catalog::{department_for_course_prefix, department_for_roll, programme_for_roll};

static RESULT_CONTAINER: LazyLock<Selector> = LazyLock::new(|| selector("#page-wrap"));
static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h2"));
static TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static TR: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static TD: LazyLock<Selector> = LazyLock::new(|| selector("td"));

const INVALID_ROLL_HEADING: &str = "kindly check the roll number";
const STUDENT_LABELS: [&str; 3] = ["ROLL NUMBER", "STUDENT NAME", "FATHER NAME"];
const SUBJECT_HEADER_ROWS: usize = 2;

// Parses a selector known at compile time.
fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

/// Role of a `<table>` in the result page, decided by its index alone.
///
/// ```text
/// 0            Header        last-updated banner
/// 1            StudentInfo   roll number / name / father's name
/// 2, 4, 6 ...  SubjectTable  courses of semester (i - 2) / 2
/// 3, 5, 7 ...  SummaryTable  SGPI / CGPI of the same semester
/// last         Trailer       footer
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePosition {
    Header,
    StudentInfo,
    SubjectTable(usize),
    SummaryTable(usize),
    Trailer,
}

impl TablePosition {
    // Role of the table at `index` out of `table_count`.
    pub fn of(index: usize, table_count: usize) -> TablePosition {
        if index == 0 {
            TablePosition::Header
        } else if index + 1 == table_count {
            TablePosition::Trailer
        } else if index == 1 {
            TablePosition::StudentInfo
        } else if index % 2 == 0 {
            TablePosition::SubjectTable((index - 2) / 2)
        } else {
            TablePosition::SummaryTable((index - 2) / 2)
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct StudentInfo {
    pub roll_number: String,
    pub name: String,
    pub fathers_name: String,
}

#[derive(Debug, PartialEq)]
pub struct SemesterSummary {
    pub sgpi: f64,
    pub cgpi: f64,
    pub sgpi_total: Option<f64>,
    pub cgpi_total: Option<f64>,
}

// Text of a cell with whitespace collapsed.
fn cell_text(cell: &ElementRef) -> String {
    cell.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reads the student table: three cells, each prefixed by a fixed label.
pub fn parse_student_info(table: ElementRef) -> StudentInfo {
    let mut info = StudentInfo::default();
    for (index, cell) in table.select(&TD).take(3).enumerate() {
        let mut text = cell_text(&cell);
        for label in STUDENT_LABELS {
            text = text.replace(label, "");
        }
        let text = text.trim().trim_start_matches(':').trim().to_string();
        match index {
            0 => info.roll_number = text,
            1 => info.name = text,
            _ => info.fathers_name = text,
        }
    }
    info
}

/// Reads one semester's course listing. The first two rows are headers; every
/// later row with at least six cells is `#, name, code, credit, grade, points`.
pub fn parse_subject_table(table: ElementRef) -> Vec<CourseRecord> {
    table
        .select(&TR)
        .skip(SUBJECT_HEADER_ROWS)
        .filter_map(|row| {
            let cells: Vec<String> = row.select(&TD).map(|c| cell_text(&c)).collect();
            if cells.len() < 6 {
                return None;
            }
            let credit = cells[3].parse().unwrap_or(0);
            let points = cells[5].parse().unwrap_or(0);
            Some(CourseRecord::new(cells[1].clone(), cells[2].clone(), credit, cells[4].clone(), points))
        })
        .collect()
}

// Text after the first `=`, or the whole text.
fn value_after_equals(text: &str) -> &str {
    match text.find('=') {
        Some(pos) => text[pos + 1..].trim(),
        None => text.trim(),
    }
}

// Last whitespace-separated token as a number.
fn last_token(text: &str) -> Option<f64> {
    text.split_whitespace().last()?.parse().ok()
}

/// Reads one semester summary: SGPI in cell 1 and CGPI in cell 3, each after a
/// literal `=`; cells 2 and 4 end with the matching totals.
pub fn parse_summary_table(table: ElementRef) -> Result<SemesterSummary, ScrapeError> {
    let cells: Vec<String> = table.select(&TD).map(|c| cell_text(&c)).collect();
    if cells.len() < 4 {
        return Err(ScrapeError::InvalidHtml(format!("summary table has {} cells", cells.len())));
    }
    let number = |index: usize, what: &str| -> Result<f64, ScrapeError> {
        value_after_equals(&cells[index])
            .parse()
            .map_err(|_| ScrapeError::InvalidHtml(format!("unreadable {what}: {:?}", cells[index])))
    };
    Ok(SemesterSummary {
        sgpi: number(1, "SGPI")?,
        cgpi: number(3, "CGPI")?,
        sgpi_total: last_token(&cells[2]),
        cgpi_total: cells.get(4).and_then(|c| last_token(c)),
    })
}

/// Majority department of the course codes taken after the second semester,
/// when it differs from the department of the roll number.
pub fn detect_branch_change(semesters: &[SemesterRecord], branch: &str) -> Option<&'static str> {
    if semesters.len() <= 2 {
        return None;
    }
    let codes: BTreeSet<&str> = semesters[2..]
        .iter()
        .flat_map(|s| s.courses.iter().map(|c| c.code.as_str()))
        .collect();

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for code in codes {
        let prefix = code.split('-').next().unwrap_or(code).trim().to_ascii_uppercase();
        *counts.entry(prefix).or_default() += 1;
    }
    // first prefix wins ties, in alphabetical order
    let max = counts.values().copied().max()?;
    let prefix = counts.iter().find(|(_, count)| **count == max).map(|(p, _)| p)?;
    let department = department_for_course_prefix(prefix)?;
    (department.name != branch).then_some(department.name)
}

/// Decodes a result page into a [`StudentRecord`].
pub fn parse_result_html(html: &str, roll_number: &str) -> Result<StudentRecord, ScrapeError> {
    let document = Html::parse_document(html);

    if document.select(&RESULT_CONTAINER).next().is_none() {
        let invalid_roll = document
            .select(&HEADING)
            .any(|h| cell_text(&h).to_lowercase().contains(INVALID_ROLL_HEADING));
        return Err(if invalid_roll {
            ScrapeError::RollNumberDoesNotExist
        } else {
            ScrapeError::InvalidHtml("result container missing".to_string())
        });
    }

    let tables: Vec<ElementRef> = document.select(&TABLE).collect();
    if tables.len() < 3 {
        return Err(ScrapeError::InvalidHtml(format!("expected at least 3 tables, found {}", tables.len())));
    }

    let mut info = StudentInfo::default();
    let mut courses: Vec<Vec<CourseRecord>> = Vec::new();
    let mut summaries: Vec<SemesterSummary> = Vec::new();

    for (index, table) in tables.iter().enumerate() {
        match TablePosition::of(index, tables.len()) {
            TablePosition::Header | TablePosition::Trailer => {}
            TablePosition::StudentInfo => info = parse_student_info(*table),
            TablePosition::SubjectTable(_) => courses.push(parse_subject_table(*table)),
            TablePosition::SummaryTable(_) => summaries.push(parse_summary_table(*table)?),
        }
    }

    if courses.len() != summaries.len() {
        return Err(ScrapeError::InvalidHtml(format!(
            "{} subject tables but {} summary tables",
            courses.len(),
            summaries.len()
        )));
    }
    if summaries.is_empty() {
        return Err(ScrapeError::InvalidHtml("no semesters found".to_string()));
    }

    let semesters: Vec<SemesterRecord> = courses
        .into_iter()
        .zip(summaries)
        .enumerate()
        .map(|(index, (courses, summary))| SemesterRecord {
            semester_number: index as u32 + 1,
            courses,
            sgpi: summary.sgpi,
            cgpi: summary.cgpi,
            sgpi_total: summary.sgpi_total,
            cgpi_total: summary.cgpi_total,
            dual_degree: false,
        })
        .collect();

    let roll = if info.roll_number.is_empty() { roll_number.to_string() } else { info.roll_number };

    let programme = programme_for_roll(&roll).ok_or_else(|| ScrapeError::UnknownProgramme(roll.clone()))?;
    let department = department_for_roll(&roll).ok_or_else(|| ScrapeError::UnknownProgramme(roll.clone()))?;
    let batch = roll
        .get(..2)
        .and_then(|yy| yy.parse::<u16>().ok())
        .map(|yy| 2000 + yy)
        .ok_or_else(|| ScrapeError::InvalidHtml(format!("roll number {roll:?} has no batch year")))?;

    let (branch, branch_changed) = match detect_branch_change(&semesters, department.name) {
        Some(changed) => {
            debug!("{roll}: branch changed from {} to {changed}", department.name);
            (changed.to_string(), true)
        }
        None => (department.name.to_string(), false),
    };

    let cgpi = semesters.last().map(|s| s.cgpi).unwrap_or_default();

    Ok(StudentRecord {
        roll_number: roll,
        name: info.name,
        fathers_name: info.fathers_name,
        branch,
        branch_changed,
        batch,
        programme: programme.name.to_string(),
        semesters,
        cgpi,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct Semester<'a> {
        pub courses: &'a [(&'a str, &'a str, &'a str, &'a str, &'a str)],
        pub sgpi: &'a str,
        pub cgpi: &'a str,
    }

    pub(crate) fn result_page(roll: &str, semesters: &[Semester]) -> String {
        let mut html = String::from(
            "<html><body><div id=\"page-wrap\">\
             <table><tr><td>Result last updated</td></tr></table>",
        );
        html.push_str(&format!(
            "<table><tr><td>ROLL NUMBER {roll}</td>\
             <td><p>STUDENT NAME</p><p>Asha  Verma</p></td>\
             <td>FATHER NAME Ravi Verma</td></tr></table>"
        ));
        for semester in semesters {
            html.push_str("<table><tr><td colspan=6>Semester</td></tr>");
            html.push_str("<tr><td>Sr</td><td>Subject</td><td>Code</td><td>Credit</td><td>Grade</td><td>Points</td></tr>");
            for (i, (name, code, credit, grade, points)) in semester.courses.iter().enumerate() {
                html.push_str(&format!(
                    "<tr><td>{}</td><td>{name}</td><td>{code}</td><td>{credit}</td><td>{grade}</td><td>{points}</td></tr>",
                    i + 1
                ));
            }
            html.push_str("</table>");
            html.push_str(&format!(
                "<table><tr><td>SGPI</td><td>SGPI={}</td><td>Total 180/22</td>\
                 <td>CGPI = {}</td><td>Total 540</td></tr></table>",
                semester.sgpi, semester.cgpi
            ));
        }
        html.push_str("<table><tr><td>Controller of Examinations</td></tr></table></div></body></html>");
        html
    }

    const SEM: &[(&str, &str, &str, &str, &str)] = &[
        ("Engineering Mathematics", "MA-101", "4", "AA", "40"),
        ("Physics", "PH-101", "3", "AB", "27"),
        ("Sports", "HS-109", "0", "S", "0"),
    ];

    fn three_semesters() -> Vec<Semester<'static>> {
        vec![
            Semester { courses: SEM, sgpi: "8.50", cgpi: "8.50" },
            Semester { courses: SEM, sgpi: "9.00", cgpi: "8.75" },
            Semester { courses: &[("Digital Circuits", "EC-201", "4", "AB", "36")], sgpi: "9.10", cgpi: "8.87" },
        ]
    }

    #[test]
    fn positions_follow_table_index() {
        assert_eq!(TablePosition::of(0, 8), TablePosition::Header);
        assert_eq!(TablePosition::of(1, 8), TablePosition::StudentInfo);
        assert_eq!(TablePosition::of(2, 8), TablePosition::SubjectTable(0));
        assert_eq!(TablePosition::of(3, 8), TablePosition::SummaryTable(0));
        assert_eq!(TablePosition::of(4, 8), TablePosition::SubjectTable(1));
        assert_eq!(TablePosition::of(7, 8), TablePosition::Trailer);
    }

    #[test]
    fn three_semester_page_takes_cgpi_from_last_semester() {
        let html = result_page("21DEC026", &three_semesters());
        let record = parse_result_html(&html, "21dec026").unwrap();

        assert_eq!(record.semesters.len(), 3);
        assert_eq!(record.cgpi, record.semesters[2].cgpi);
        assert_eq!(record.cgpi, 8.87);
        assert_eq!(record.semesters[1].sgpi, 9.0);
        assert_eq!(record.semesters[2].semester_number, 3);
        assert_eq!(record.semesters[0].sgpi_total, None);
        assert_eq!(record.semesters[0].cgpi_total, Some(540.0));
    }

    #[test]
    fn student_labels_are_stripped() {
        let html = result_page("21DEC026", &three_semesters());
        let record = parse_result_html(&html, "21dec026").unwrap();
        assert_eq!(record.roll_number, "21DEC026");
        assert_eq!(record.name, "Asha Verma");
        assert_eq!(record.fathers_name, "Ravi Verma");
        assert_eq!(record.batch, 2021);
        assert_eq!(record.programme, "Dual Degree");
        assert_eq!(record.branch, "Electronics and Communication Engineering");
        assert!(!record.branch_changed);
    }

    #[test]
    fn course_rows_skip_headers_and_guard_zero_credit() {
        let html = result_page("21BCS001", &three_semesters()[..1]);
        let record = parse_result_html(&html, "21bcs001").unwrap();
        let courses = &record.semesters[0].courses;
        assert_eq!(courses.len(), 3);
        assert_eq!(courses[0].code, "MA-101");
        assert_eq!(courses[0].cgpi, Some(10.0));
        assert_eq!(courses[1].cgpi, Some(9.0));
        assert_eq!(courses[2].credit, 0);
        assert_eq!(courses[2].cgpi, None);
    }

    #[test]
    fn invalid_roll_heading_means_roll_does_not_exist() {
        let html = "<html><body><h2>Kindly Check the Roll Number</h2></body></html>";
        assert_eq!(parse_result_html(html, "21bcs999"), Err(ScrapeError::RollNumberDoesNotExist));
    }

    #[test]
    fn missing_container_without_heading_is_invalid_html() {
        let html = "<html><body><h2>Service unavailable</h2></body></html>";
        assert!(matches!(parse_result_html(html, "21bcs001"), Err(ScrapeError::InvalidHtml(_))));
    }

    #[test]
    fn container_without_semesters_is_invalid_html() {
        let html = result_page("21BCS001", &[]);
        assert!(matches!(parse_result_html(&html, "21bcs001"), Err(ScrapeError::InvalidHtml(_))));
    }

    #[test]
    fn unpaired_subject_table_is_invalid_html() {
        let mut html = result_page("21BCS001", &three_semesters()[..1]);
        let at = html.find("<table><tr><td>Controller").unwrap();
        html.insert_str(at, "<table><tr><td>h</td></tr><tr><td>h</td></tr></table>");
        assert!(matches!(parse_result_html(&html, "21bcs001"), Err(ScrapeError::InvalidHtml(_))));
    }

    #[test]
    fn unknown_programme_is_its_own_failure() {
        let html = result_page("21XYZ001", &three_semesters()[..1]);
        assert_eq!(
            parse_result_html(&html, "21xyz001"),
            Err(ScrapeError::UnknownProgramme("21XYZ001".to_string()))
        );
    }

    #[test]
    fn branch_change_follows_majority_prefix_after_second_semester() {
        let later: &[(&str, &str, &str, &str, &str)] = &[
            ("Data Structures", "CS-201", "4", "AA", "40"),
            ("Algorithms", "CS-202", "4", "AA", "40"),
            ("Signals", "EC-203", "4", "AB", "36"),
        ];
        let semesters = vec![
            Semester { courses: SEM, sgpi: "8", cgpi: "8" },
            Semester { courses: SEM, sgpi: "8", cgpi: "8" },
            Semester { courses: later, sgpi: "9", cgpi: "8.3" },
        ];
        let html = result_page("21BEC010", &semesters);
        let record = parse_result_html(&html, "21bec010").unwrap();
        assert!(record.branch_changed);
        assert_eq!(record.branch, "Computer Science and Engineering");
    }

    #[test]
    fn unreadable_cgpi_is_invalid_html() {
        let html = result_page("21BCS001", &[Semester { courses: SEM, sgpi: "8.1", cgpi: "N/A" }]);
        assert!(matches!(parse_result_html(&html, "21bcs001"), Err(ScrapeError::InvalidHtml(_))));
    }
}
