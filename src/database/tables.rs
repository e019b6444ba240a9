//! Closed set of tables the query layer may touch.
//!
//! Table identifiers cannot be bound as SQL parameters, so every name that
//! reaches generated SQL comes from [`Table`]. Caller-supplied strings go
//! through [`Table::parse`] first.

use std::fmt;
use std::str::FromStr;

use crate::database::manager::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Directory database: token -> tenant database mapping
    SchoolData,
    Students,
    Staff,
    Classes,
    Levels,
    Courses,
    /// Course registrations and their results
    Results,
    Attendance,
    Grades,
    Assessments,
    CourseAssignments,
    RegistrationTracker,
    SchoolSettings,
}

impl Table {
    pub const ALL: [Table; 13] = [
        Table::SchoolData,
        Table::Students,
        Table::Staff,
        Table::Classes,
        Table::Levels,
        Table::Courses,
        Table::Results,
        Table::Attendance,
        Table::Grades,
        Table::Assessments,
        Table::CourseAssignments,
        Table::RegistrationTracker,
        Table::SchoolSettings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::SchoolData => "school_data",
            Table::Students => "students_record",
            Table::Staff => "staff_record",
            Table::Classes => "class_table",
            Table::Levels => "level_table",
            Table::Courses => "course_table",
            Table::Results => "result_table",
            Table::Attendance => "attendance",
            Table::Grades => "score_grade_table",
            Table::Assessments => "assessment_table",
            Table::CourseAssignments => "staff_course_table",
            Table::RegistrationTracker => "registration_tracker",
            Table::SchoolSettings => "school_settings_table",
        }
    }

    /// Resolve a caller-supplied table name, rejecting anything off the list.
    pub fn parse(name: &str) -> Result<Table, DatabaseError> {
        Table::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| DatabaseError::AccessDenied(format!("Request not allowed for table {}", name)))
    }

    /// Quoted identifier for SQL interpolation
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.as_str())
    }
}

/// Membership test over the allow-list.
pub fn is_allowed(name: &str) -> bool {
    Table::ALL.iter().any(|t| t.as_str() == name)
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::parse(s)
    }
}
