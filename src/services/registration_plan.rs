//! Pure planning for course registration: normalizing caller references into
//! typed ids and computing what a reconciliation has to write.
//!
//! Nothing in here touches a connection, so every rule about which rows get
//! inserted or replayed is tested without a database.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::database::manager::DatabaseError;
use crate::database::models::EnrollmentRecord;
use crate::database::record::{record, Record};
use crate::services::registration_service::RegistrationError;

/// Row id of a learner (`students_record.id`, stored as `result_table.reg_no`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnerId(pub i64);

/// Row id of a course (`course_table.id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub i64);

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An id as clients send it: a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Number(i64),
    Text(String),
}

impl IdValue {
    fn parse(&self) -> Option<i64> {
        let id = match self {
            IdValue::Number(n) => *n,
            IdValue::Text(s) => s.trim().parse().ok()?,
        };
        (id > 0).then_some(id)
    }

    fn describe(&self) -> String {
        match self {
            IdValue::Number(n) => n.to_string(),
            IdValue::Text(s) => format!("{:?}", s),
        }
    }
}

/// A learner reference: a bare id, or `{"learner_id": ..}` / `{"student_id": ..}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LearnerRef {
    Id(IdValue),
    Keyed {
        #[serde(alias = "student_id")]
        learner_id: IdValue,
    },
}

impl LearnerRef {
    pub fn resolve(&self) -> Result<LearnerId, RegistrationError> {
        let raw = match self {
            LearnerRef::Id(v) | LearnerRef::Keyed { learner_id: v } => v,
        };
        raw.parse()
            .map(LearnerId)
            .ok_or_else(|| RegistrationError::InvalidReference(format!("learner id {}", raw.describe())))
    }
}

impl From<LearnerId> for LearnerRef {
    fn from(id: LearnerId) -> Self {
        LearnerRef::Id(IdValue::Number(id.0))
    }
}

/// A course reference: a bare id or `{"course_id": ..}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CourseRef {
    Id(IdValue),
    Keyed { course_id: IdValue },
}

impl CourseRef {
    pub fn resolve(&self) -> Result<CourseId, RegistrationError> {
        let raw = match self {
            CourseRef::Id(v) | CourseRef::Keyed { course_id: v } => v,
        };
        raw.parse()
            .map(CourseId)
            .ok_or_else(|| RegistrationError::InvalidReference(format!("course id {}", raw.describe())))
    }
}

impl From<CourseId> for CourseRef {
    fn from(id: CourseId) -> Self {
        CourseRef::Id(IdValue::Number(id.0))
    }
}

/// Resolve learner references, dropping repeats but keeping first-seen order.
pub fn normalize_learners(refs: &[LearnerRef]) -> Result<Vec<LearnerId>, RegistrationError> {
    if refs.is_empty() {
        return Err(RegistrationError::EmptyLearners);
    }
    let ids = refs.iter().map(LearnerRef::resolve).collect::<Result<Vec<_>, _>>()?;
    Ok(dedup(ids))
}

/// Resolve course references, dropping repeats but keeping first-seen order.
pub fn normalize_courses(refs: &[CourseRef]) -> Result<Vec<CourseId>, RegistrationError> {
    if refs.is_empty() {
        return Err(RegistrationError::EmptyCourses);
    }
    let ids = refs.iter().map(CourseRef::resolve).collect::<Result<Vec<_>, _>>()?;
    Ok(dedup(ids))
}

fn dedup<T: Copy + Eq + std::hash::Hash>(ids: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Deserialize a positive integer sent as a JSON number or numeric string.
pub fn flexible_int<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: TryFrom<i64>,
{
    let raw = IdValue::deserialize(deserializer)?;
    raw.parse()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("expected a positive integer, got {}", raw.describe())))
}

/// The `(term, year, class)` a registration applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationScope {
    #[serde(deserialize_with = "flexible_int")]
    pub term: i32,
    #[serde(deserialize_with = "flexible_int")]
    pub year: i32,
    #[serde(deserialize_with = "flexible_int")]
    pub class_id: i64,
}

impl RegistrationScope {
    pub fn new(term: i32, year: i32, class_id: i64) -> Self {
        Self { term, year, class_id }
    }

    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.term < 1 {
            return Err(RegistrationError::InvalidScope(format!("term must be positive, got {}", self.term)));
        }
        if self.year < 1 {
            return Err(RegistrationError::InvalidScope(format!("year must be positive, got {}", self.year)));
        }
        if self.class_id < 1 {
            return Err(RegistrationError::InvalidScope(format!(
                "class_id must be positive, got {}",
                self.class_id
            )));
        }
        Ok(())
    }

    /// Equality conditions selecting one learner's rows in this scope
    pub fn learner_conditions(&self, learner: LearnerId) -> Record {
        record([
            ("reg_no", json!(learner.0)),
            ("class", json!(self.class_id)),
            ("term", json!(self.term)),
            ("year", json!(self.year)),
        ])
    }
}

/// One `(learner, course)` pair that should be registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DesiredEnrollment {
    pub learner: LearnerId,
    pub course: CourseId,
}

impl DesiredEnrollment {
    pub fn to_row(&self, scope: &RegistrationScope) -> Record {
        record([
            ("year", json!(scope.year)),
            ("term", json!(scope.term)),
            ("course", json!(self.course.0)),
            ("reg_no", json!(self.learner.0)),
            ("class", json!(scope.class_id)),
        ])
    }
}

/// A desired pair the learner already holds for the same term under another class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldElsewhere {
    pub learner: LearnerId,
    pub course: CourseId,
    pub class_id: i64,
}

/// Inserts needed to bring a scope up to the desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationPlan {
    pub to_insert: Vec<DesiredEnrollment>,
    pub already_registered: usize,
    pub held_elsewhere: Vec<HeldElsewhere>,
}

impl RegistrationPlan {
    /// Diff the cross-product `learners x courses` against rows already present
    /// for the same year and term.
    ///
    /// Only rows of `scope.class_id` count as registered. A pair held under
    /// another class blocks the insert, since `(year, term, course, reg_no)`
    /// is unique, and is reported in `held_elsewhere`.
    pub fn compute(
        learners: &[LearnerId],
        courses: &[CourseId],
        scope: &RegistrationScope,
        existing: &[EnrollmentRecord],
    ) -> Self {
        let held: HashMap<(i64, i64), i64> = existing
            .iter()
            .filter(|row| row.year == scope.year && row.term == scope.term)
            .map(|row| ((row.reg_no, row.course), row.class))
            .collect();

        let mut plan = RegistrationPlan::default();
        for &learner in learners {
            for &course in courses {
                match held.get(&(learner.0, course.0)) {
                    Some(&class_id) if class_id == scope.class_id => plan.already_registered += 1,
                    Some(&class_id) => plan.held_elsewhere.push(HeldElsewhere { learner, course, class_id }),
                    None => plan.to_insert.push(DesiredEnrollment { learner, course }),
                }
            }
        }
        plan
    }

    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.held_elsewhere.is_empty()
    }

    /// The conflict to fail with when a desired pair sits in another class
    pub fn conflict(&self, scope: &RegistrationScope) -> Option<DatabaseError> {
        self.held_elsewhere.first().map(|held| {
            DatabaseError::ConstraintViolation(format!(
                "Learner {} is already registered for course {} in class {} for term {} of {}",
                held.learner, held.course, held.class_id, scope.term, scope.year
            ))
        })
    }
}

/// How `duplicate_registration` turns a class's existing rows into a new term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicationMode {
    /// Replay each learner's course set from the latest term of the year
    /// other than the target. Earlier terms are not merged in.
    #[default]
    ExactPairs,
    /// Every distinct learner gets every distinct course of the year
    CrossProduct,
}

/// One registration call: these learners, exactly these courses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationBatch {
    pub learners: Vec<LearnerId>,
    pub courses: Vec<CourseId>,
}

/// Build the batches that copy `rows` into `target_term` of `requested_year`.
///
/// `rows` must be ordered by id; the first row's year is the year being
/// copied from, and only rows of that year take part.
pub fn plan_duplication(
    rows: &[EnrollmentRecord],
    requested_year: i32,
    target_term: i32,
    mode: DuplicationMode,
) -> Result<Vec<RegistrationBatch>, RegistrationError> {
    let first = rows.first().ok_or_else(|| {
        RegistrationError::NotFound("No existing registrations found to duplicate.".to_string())
    })?;
    let old_year = first.year;
    if old_year != requested_year {
        return Err(RegistrationError::AcademicYearMismatch {
            existing: old_year,
            requested: requested_year,
        });
    }

    let source = rows.iter().filter(|row| row.year == old_year);

    let batches = match mode {
        DuplicationMode::ExactPairs => {
            // Falls back to the target term itself when it is the only one held
            let source_term = source
                .clone()
                .map(|row| row.term)
                .filter(|&term| term != target_term)
                .max()
                .unwrap_or(target_term);

            let mut by_learner: BTreeMap<LearnerId, Vec<CourseId>> = BTreeMap::new();
            for row in source.filter(|row| row.term == source_term) {
                let courses = by_learner.entry(LearnerId(row.reg_no)).or_default();
                let course = CourseId(row.course);
                if !courses.contains(&course) {
                    courses.push(course);
                }
            }
            by_learner
                .into_iter()
                .map(|(learner, courses)| RegistrationBatch { learners: vec![learner], courses })
                .collect()
        }
        DuplicationMode::CrossProduct => {
            let (learners, courses): (Vec<_>, Vec<_>) =
                source.map(|row| (LearnerId(row.reg_no), CourseId(row.course))).unzip();
            vec![RegistrationBatch { learners: dedup(learners), courses: dedup(courses) }]
        }
    };

    Ok(batches)
}

/// Group `(year, term)` pairs into year -> distinct terms.
pub fn group_terms<I>(pairs: I) -> BTreeMap<i32, BTreeSet<i32>>
where
    I: IntoIterator<Item = (i32, i32)>,
{
    let mut grouped: BTreeMap<i32, BTreeSet<i32>> = BTreeMap::new();
    for (year, term) in pairs {
        grouped.entry(year).or_default().insert(term);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, year: i32, term: i32, course: i64, reg_no: i64, class: i64) -> EnrollmentRecord {
        EnrollmentRecord { id, year, term, course, reg_no, class }
    }

    fn learners(json: &str) -> Vec<LearnerRef> {
        serde_json::from_str(json).unwrap()
    }

    fn courses(json: &str) -> Vec<CourseRef> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn learner_refs_accept_every_client_shape() {
        let refs = learners(r#"[501, "502", {"student_id": 503}, {"learner_id": "504"}]"#);
        let ids = normalize_learners(&refs).unwrap();
        assert_eq!(ids, vec![LearnerId(501), LearnerId(502), LearnerId(503), LearnerId(504)]);
    }

    #[test]
    fn course_refs_accept_bare_and_keyed() {
        let ids = normalize_courses(&courses(r#"[7, {"course_id": "9"}]"#)).unwrap();
        assert_eq!(ids, vec![CourseId(7), CourseId(9)]);
    }

    #[test]
    fn repeated_refs_collapse_in_order() {
        let ids = normalize_courses(&courses(r#"[9, 7, "9", {"course_id": 7}]"#)).unwrap();
        assert_eq!(ids, vec![CourseId(9), CourseId(7)]);
    }

    #[test]
    fn empty_lists_are_rejected() {
        assert!(matches!(normalize_learners(&[]), Err(RegistrationError::EmptyLearners)));
        assert!(matches!(normalize_courses(&[]), Err(RegistrationError::EmptyCourses)));
    }

    #[test]
    fn garbage_ids_are_invalid_references() {
        for bad in [r#"["abc"]"#, "[0]", "[-4]", r#"[{"learner_id": "x"}]"#] {
            let err = normalize_learners(&learners(bad)).unwrap_err();
            assert!(matches!(err, RegistrationError::InvalidReference(_)), "{bad}");
        }
    }

    #[test]
    fn scope_deserializes_from_numbers_or_strings() {
        let scope: RegistrationScope =
            serde_json::from_value(json!({"term": "2", "year": 2024, "class_id": "3"})).unwrap();
        assert_eq!(scope, RegistrationScope::new(2, 2024, 3));

        let bad = serde_json::from_value::<RegistrationScope>(json!({"term": "two", "year": 2024, "class_id": 3}));
        assert!(bad.is_err());
    }

    #[test]
    fn scope_validation() {
        assert!(RegistrationScope::new(1, 2024, 3).validate().is_ok());
        assert!(matches!(
            RegistrationScope::new(0, 2024, 3).validate(),
            Err(RegistrationError::InvalidScope(_))
        ));
        assert!(RegistrationScope::new(1, 2024, 0).validate().is_err());
    }

    #[test]
    fn plan_inserts_only_missing_pairs() {
        let scope = RegistrationScope::new(1, 2024, 3);
        let existing = vec![row(1, 2024, 1, 7, 501, 3), row(2, 2024, 1, 8, 501, 3)];
        let plan = RegistrationPlan::compute(&[LearnerId(501)], &[CourseId(7), CourseId(9)], &scope, &existing);

        assert_eq!(
            plan.to_insert,
            vec![DesiredEnrollment { learner: LearnerId(501), course: CourseId(9) }]
        );
        assert_eq!(plan.already_registered, 1);
    }

    #[test]
    fn plan_is_noop_when_everything_is_held() {
        let scope = RegistrationScope::new(1, 2024, 3);
        let existing = vec![row(1, 2024, 1, 7, 501, 3), row(2, 2024, 1, 9, 501, 3)];
        let plan = RegistrationPlan::compute(&[LearnerId(501)], &[CourseId(7), CourseId(9)], &scope, &existing);
        assert!(plan.is_noop());
        assert_eq!(plan.already_registered, 2);
    }

    #[test]
    fn plan_ignores_other_terms() {
        let scope = RegistrationScope::new(2, 2024, 3);
        // same pair, previous term: still needs a row
        let existing = vec![row(1, 2024, 1, 7, 501, 3)];
        let plan = RegistrationPlan::compute(&[LearnerId(501)], &[CourseId(7)], &scope, &existing);
        assert_eq!(
            plan.to_insert,
            vec![DesiredEnrollment { learner: LearnerId(501), course: CourseId(7) }]
        );
        assert!(plan.held_elsewhere.is_empty());
    }

    #[test]
    fn pair_held_under_another_class_is_a_conflict() {
        let scope = RegistrationScope::new(2, 2024, 3);
        let existing = vec![row(2, 2024, 2, 9, 501, 4)];
        let plan = RegistrationPlan::compute(&[LearnerId(501)], &[CourseId(7), CourseId(9)], &scope, &existing);

        assert_eq!(
            plan.to_insert,
            vec![DesiredEnrollment { learner: LearnerId(501), course: CourseId(7) }]
        );
        assert_eq!(plan.already_registered, 0);
        assert_eq!(
            plan.held_elsewhere,
            vec![HeldElsewhere { learner: LearnerId(501), course: CourseId(9), class_id: 4 }]
        );
        assert!(!plan.is_noop());

        match plan.conflict(&scope) {
            Some(DatabaseError::ConstraintViolation(msg)) => {
                assert_eq!(msg, "Learner 501 is already registered for course 9 in class 4 for term 2 of 2024")
            }
            other => panic!("expected ConstraintViolation, got {:?}", other),
        }
    }

    #[test]
    fn plan_without_foreign_rows_has_no_conflict() {
        let scope = RegistrationScope::new(1, 2024, 3);
        let existing = vec![row(1, 2024, 1, 7, 501, 3)];
        let plan = RegistrationPlan::compute(&[LearnerId(501)], &[CourseId(7)], &scope, &existing);
        assert!(plan.conflict(&scope).is_none());
    }

    #[test]
    fn desired_rows_carry_the_scope() {
        let scope = RegistrationScope::new(2, 2024, 3);
        let row = DesiredEnrollment { learner: LearnerId(501), course: CourseId(7) }.to_row(&scope);
        assert_eq!(row.get("reg_no"), Some(&json!(501)));
        assert_eq!(row.get("course"), Some(&json!(7)));
        assert_eq!(row.get("class"), Some(&json!(3)));
        assert_eq!(row.get("term"), Some(&json!(2)));
        assert_eq!(row.get("year"), Some(&json!(2024)));
    }

    #[test]
    fn duplication_requires_rows() {
        let err = plan_duplication(&[], 2024, 2, DuplicationMode::ExactPairs).unwrap_err();
        assert!(matches!(err, RegistrationError::NotFound(_)));
    }

    #[test]
    fn duplication_rejects_year_change() {
        let rows = vec![row(1, 2023, 3, 7, 501, 3)];
        let err = plan_duplication(&rows, 2024, 1, DuplicationMode::ExactPairs).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::AcademicYearMismatch { existing: 2023, requested: 2024 }
        ));
    }

    #[test]
    fn exact_pairs_replays_each_learners_own_courses() {
        let rows = vec![row(1, 2024, 1, 7, 501, 3), row(2, 2024, 1, 8, 501, 3), row(3, 2024, 1, 9, 502, 3)];
        let batches = plan_duplication(&rows, 2024, 2, DuplicationMode::ExactPairs).unwrap();
        assert_eq!(
            batches,
            vec![
                RegistrationBatch { learners: vec![LearnerId(501)], courses: vec![CourseId(7), CourseId(8)] },
                RegistrationBatch { learners: vec![LearnerId(502)], courses: vec![CourseId(9)] },
            ]
        );
    }

    #[test]
    fn exact_pairs_copies_the_latest_term_only() {
        let rows = vec![
            row(1, 2024, 1, 7, 501, 3),
            row(2, 2024, 1, 8, 501, 3),
            row(3, 2024, 1, 5, 502, 3),
            row(4, 2024, 2, 9, 501, 3),
        ];
        let batches = plan_duplication(&rows, 2024, 3, DuplicationMode::ExactPairs).unwrap();
        assert_eq!(
            batches,
            vec![RegistrationBatch { learners: vec![LearnerId(501)], courses: vec![CourseId(9)] }]
        );
    }

    #[test]
    fn exact_pairs_never_copies_from_the_target_term_when_another_exists() {
        let rows = vec![row(1, 2024, 1, 7, 501, 3), row(2, 2024, 3, 9, 501, 3)];
        let batches = plan_duplication(&rows, 2024, 3, DuplicationMode::ExactPairs).unwrap();
        assert_eq!(batches[0].courses, vec![CourseId(7)]);

        let only_target = vec![row(1, 2024, 3, 9, 501, 3)];
        let batches = plan_duplication(&only_target, 2024, 3, DuplicationMode::ExactPairs).unwrap();
        assert_eq!(batches[0].courses, vec![CourseId(9)]);
    }

    #[test]
    fn cross_product_merges_everything() {
        let rows = vec![row(1, 2024, 1, 7, 501, 3), row(2, 2024, 1, 9, 502, 3), row(3, 2024, 1, 7, 502, 3)];
        let batches = plan_duplication(&rows, 2024, 2, DuplicationMode::CrossProduct).unwrap();
        assert_eq!(
            batches,
            vec![RegistrationBatch {
                learners: vec![LearnerId(501), LearnerId(502)],
                courses: vec![CourseId(7), CourseId(9)],
            }]
        );
    }

    #[test]
    fn duplication_skips_rows_of_later_years() {
        let rows = vec![row(1, 2024, 1, 7, 501, 3), row(2, 2025, 1, 9, 501, 3)];
        let batches = plan_duplication(&rows, 2024, 2, DuplicationMode::ExactPairs).unwrap();
        assert_eq!(batches[0].courses, vec![CourseId(7)]);
    }

    #[test]
    fn mode_parses_snake_case_and_defaults_to_exact() {
        let mode: DuplicationMode = serde_json::from_str(r#""cross_product""#).unwrap();
        assert_eq!(mode, DuplicationMode::CrossProduct);
        assert_eq!(DuplicationMode::default(), DuplicationMode::ExactPairs);
    }

    #[test]
    fn terms_group_by_year() {
        let grouped = group_terms([(2024, 1), (2024, 2), (2024, 1), (2023, 3)]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&2024].iter().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(grouped[&2023].iter().copied().collect::<Vec<_>>(), vec![3]);
    }
}
