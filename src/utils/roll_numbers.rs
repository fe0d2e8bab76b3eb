use std::sync::LazyLock;

use regex::Regex;

use crate::utils::catalog::{department_for_course_prefix, programme_by_name, roll_code, PROGRAMMES};

static ROLL_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\d{2}[a-z]{3}\d{3}$").expect("roll number pattern compiles"));

/// First admission year served by the portal.
pub const FIRST_BATCH: u16 = 2020;
/// Last year the two-digit batch prefix can name without wrapping to `00`.
pub const LAST_BATCH: u16 = 2099;

// Format YYCCCNNN with a sequence number in 1..=999.
pub fn is_valid_roll_number(roll_number: &str) -> bool {
    if !ROLL_NUMBER.is_match(roll_number) {
        return false;
    }
    matches!(roll_number[5..].parse::<u16>(), Ok(1..=999))
}

/// Every candidate roll number of a batch, programme by programme, code by code,
/// sequence by sequence. Years outside `FIRST_BATCH..=LAST_BATCH` yield nothing.
pub fn generate(batch_year: u16) -> Vec<String> {
    if !(FIRST_BATCH..=LAST_BATCH).contains(&batch_year) {
        return Vec::new();
    }
    let yy = batch_year % 100;

    let mut roll_numbers = Vec::new();
    for programme in &PROGRAMMES {
        for code in programme.codes {
            let code = code.to_ascii_uppercase();
            for seq in 1..=programme.threshold {
                roll_numbers.push(format!("{yy:02}{code}{seq:03}"));
            }
        }
    }
    roll_numbers
}

/// Roll numbers of one class: a two-letter branch code (`cs`, `ec`, ...) within
/// one programme (`B.Tech`, `Dual Degree`, ...). Unknown branches or programmes
/// yield nothing.
pub fn generate_for_class(batch_year: u16, branch: &str, programme: &str) -> Vec<String> {
    let branch = branch.trim().to_ascii_lowercase();
    if branch.is_empty() || department_for_course_prefix(&branch).is_none() {
        return Vec::new();
    }
    let Some(programme) = programme_by_name(programme) else {
        return Vec::new();
    };

    generate(batch_year)
        .into_iter()
        .filter(|roll| match roll_code(roll) {
            Some(code) => programme.codes.contains(&code.as_str()) && code.contains(&branch),
            None => false,
        })
        .collect()
}
