// Reference tables for the result portal. Programme order and code order are
// lexicographic so every walk over them is deterministic.

#[derive(Debug, PartialEq, Eq)]
pub struct Programme {
    pub name: &'static str,
    /// Path prefix of the upstream scheme serving this programme, e.g. `scheme21`.
    pub scheme: &'static str,
    /// Scheme carrying the semesters past the B.Tech part of a dual degree.
    pub dual_scheme: Option<&'static str>,
    pub codes: &'static [&'static str],
    /// Highest sequence number handed out per code in one batch.
    pub threshold: u16,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Department {
    pub name: &'static str,
    pub short: &'static str,
    pub roll_keys: &'static [&'static str],
    pub course_prefix: &'static str,
}

pub static PROGRAMMES: [Programme; 4] = [
    Programme { name: "B.Arch", scheme: "scheme", dual_scheme: None, codes: &["bar"], threshold: 60 },
    Programme {
        name: "B.Tech",
        scheme: "scheme",
        dual_scheme: None,
        codes: &["bce", "bch", "bcs", "bec", "bee", "bma", "bme", "bms", "bph"],
        threshold: 120,
    },
    Programme {
        name: "Dual Degree",
        scheme: "scheme",
        dual_scheme: Some("dualdegree"),
        codes: &["dcs", "dec"],
        threshold: 30,
    },
    Programme {
        name: "M.Tech",
        scheme: "mtech",
        dual_scheme: None,
        codes: &["mce", "mch", "mcs", "mec", "mee", "mma", "mme", "mms", "mph"],
        threshold: 40,
    },
];

pub static DEPARTMENTS: [Department; 10] = [
    Department { name: "Computer Science and Engineering", short: "CSE", roll_keys: &["bcs", "dcs", "mcs"], course_prefix: "CS" },
    Department { name: "Electronics and Communication Engineering", short: "ECE", roll_keys: &["bec", "dec", "mec"], course_prefix: "EC" },
    Department { name: "Electrical Engineering", short: "EE", roll_keys: &["bee", "mee"], course_prefix: "EE" },
    Department { name: "Mechanical Engineering", short: "ME", roll_keys: &["bme", "mme"], course_prefix: "ME" },
    Department { name: "Civil Engineering", short: "CE", roll_keys: &["bce", "mce"], course_prefix: "CE" },
    Department { name: "Chemical Engineering", short: "CHE", roll_keys: &["bch", "mch"], course_prefix: "CH" },
    Department { name: "Materials Science and Engineering", short: "MSE", roll_keys: &["bms", "mms"], course_prefix: "MS" },
    Department { name: "Mathematics & Scientific Computing", short: "MNC", roll_keys: &["bma", "mma"], course_prefix: "MA" },
    Department { name: "Architecture", short: "ARC", roll_keys: &["bar", "mar"], course_prefix: "AR" },
    Department { name: "Engineering Physics", short: "PHY", roll_keys: &["bph", "mph"], course_prefix: "PH" },
];

/// The 3-letter programme/branch code embedded in a roll number, lower-cased.
pub fn roll_code(roll_number: &str) -> Option<String> {
    roll_number.get(2..5).map(|code| code.to_ascii_lowercase())
}

// Finds the programme a 3-letter roll code belongs to.
pub fn programme_for_code(code: &str) -> Option<&'static Programme> {
    let code = code.to_ascii_lowercase();
    PROGRAMMES.iter().find(|p| p.codes.contains(&code.as_str()))
}

// Same lookup, straight from a roll number.
pub fn programme_for_roll(roll_number: &str) -> Option<&'static Programme> {
    programme_for_code(&roll_code(roll_number)?)
}

// Matches a programme by display name, ignoring case.
pub fn programme_by_name(name: &str) -> Option<&'static Programme> {
    PROGRAMMES.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim()))
}

// Finds the department a roll number was admitted to.
pub fn department_for_roll(roll_number: &str) -> Option<&'static Department> {
    let code = roll_code(roll_number)?;
    DEPARTMENTS.iter().find(|d| d.roll_keys.contains(&code.as_str()))
}

// Finds the department owning a course code prefix such as `CS`.
pub fn department_for_course_prefix(prefix: &str) -> Option<&'static Department> {
    DEPARTMENTS.iter().find(|d| d.course_prefix.eq_ignore_ascii_case(prefix))
}
