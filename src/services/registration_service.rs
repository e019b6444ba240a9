use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::{debug, info};

use crate::database::executor::QueryExecutor;
use crate::database::manager::DatabaseError;
use crate::database::models::EnrollmentRecord;
use crate::database::query_builder::{QueryBuilder, SortDirection};
use crate::database::record::record;
use crate::database::repository;
use crate::database::tables::Table;
use crate::services::registration_plan::{
    group_terms, normalize_courses, normalize_learners, plan_duplication, CourseId, CourseRef, DuplicationMode,
    LearnerId, LearnerRef, RegistrationPlan, RegistrationScope,
};

/// Rows per multi-row INSERT (five parameters each)
const INSERT_CHUNK: usize = 1000;
/// Learner ids per existence lookup
const LOOKUP_CHUNK: usize = 5000;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("At least one learner is required")]
    EmptyLearners,

    #[error("At least one course is required")]
    EmptyCourses,

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Cannot duplicate registrations: academic year mismatch (existing: {existing}, new: {requested}).")]
    AcademicYearMismatch { existing: i32, requested: i32 },

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl RegistrationError {
    pub fn is_client_error(&self) -> bool {
        match self {
            RegistrationError::Database(e) => e.is_client_error(),
            _ => true,
        }
    }
}

impl From<sqlx::Error> for RegistrationError {
    fn from(err: sqlx::Error) -> Self {
        RegistrationError::Database(DatabaseError::from(err))
    }
}

/// What a reconciliation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationOutcome {
    pub learners_processed: usize,
    pub inserted: u64,
    pub already_registered: usize,
    pub pruned: u64,
}

impl RegistrationOutcome {
    fn absorb(&mut self, other: RegistrationOutcome) {
        self.learners_processed += other.learners_processed;
        self.inserted += other.inserted;
        self.already_registered += other.already_registered;
        self.pruned += other.pruned;
    }
}

/// Course registration against one tenant database.
pub struct RegistrationService {
    pool: PgPool,
}

impl RegistrationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reconcile the scope so each learner holds exactly `courses`.
    ///
    /// Returns `true` once every learner has been processed; any failure
    /// rolls the whole call back.
    pub async fn register(
        &self,
        learners: &[LearnerRef],
        courses: &[CourseRef],
        scope: RegistrationScope,
    ) -> Result<bool, RegistrationError> {
        let expected = normalize_learners(learners)?.len();
        let outcome = self.register_detailed(learners, courses, scope).await?;
        Ok(outcome.learners_processed == expected)
    }

    pub async fn register_detailed(
        &self,
        learners: &[LearnerRef],
        courses: &[CourseRef],
        scope: RegistrationScope,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let learners = normalize_learners(learners)?;
        let courses = normalize_courses(courses)?;
        scope.validate()?;

        let mut tx = self.pool.begin().await?;
        let outcome = reconcile(&mut tx, &learners, &courses, &scope).await?;
        tx.commit().await?;

        info!(
            class_id = scope.class_id,
            term = scope.term,
            year = scope.year,
            learners = outcome.learners_processed,
            inserted = outcome.inserted,
            pruned = outcome.pruned,
            "course registration reconciled"
        );
        Ok(outcome)
    }

    /// Register `courses` for every learner currently in `scope.class_id`.
    pub async fn register_class(
        &self,
        courses: &[CourseRef],
        scope: RegistrationScope,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let members = repository::learners(self.pool.clone()).in_class(scope.class_id).await?;
        let learners: Vec<LearnerRef> = members.iter().map(|l| LearnerRef::from(LearnerId(l.id))).collect();
        self.register_detailed(&learners, courses, scope).await
    }

    /// Delete the learner's rows in scope whose course is not in `desired`.
    /// An empty `desired` is rejected; use [`Self::unregister_all`] for that.
    pub async fn prune_stale(
        &self,
        learner: &LearnerRef,
        desired: &[CourseRef],
        scope: RegistrationScope,
    ) -> Result<u64, RegistrationError> {
        let learner = learner.resolve()?;
        let desired = normalize_courses(desired)?;
        scope.validate()?;

        let mut conn = self.pool.acquire().await?;
        prune(&mut conn, learner, &desired, &scope).await
    }

    /// Remove every registration the learner holds in scope
    pub async fn unregister_all(&self, learner: &LearnerRef, scope: RegistrationScope) -> Result<u64, RegistrationError> {
        self.unregister_all_of(std::slice::from_ref(learner), scope).await
    }

    pub async fn unregister_all_of(
        &self,
        learners: &[LearnerRef],
        scope: RegistrationScope,
    ) -> Result<u64, RegistrationError> {
        let learners = normalize_learners(learners)?;
        scope.validate()?;
        self.delete_in_scope(&learners, None, &scope).await
    }

    /// Remove specific `(learner, course)` registrations in scope
    pub async fn unregister(
        &self,
        learners: &[LearnerRef],
        courses: &[CourseRef],
        scope: RegistrationScope,
    ) -> Result<u64, RegistrationError> {
        let learners = normalize_learners(learners)?;
        let courses = normalize_courses(courses)?;
        scope.validate()?;
        self.delete_in_scope(&learners, Some(&courses), &scope).await
    }

    async fn delete_in_scope(
        &self,
        learners: &[LearnerId],
        courses: Option<&[CourseId]>,
        scope: &RegistrationScope,
    ) -> Result<u64, RegistrationError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for chunk in learners.chunks(LOOKUP_CHUNK) {
            let mut query = scoped(scope).where_in("reg_no", chunk.iter().map(|l| l.0));
            if let Some(courses) = courses {
                query = query.where_in("course", courses.iter().map(|c| c.0));
            }
            removed += query.delete(&mut tx).await?;
        }
        tx.commit().await?;

        info!(class_id = scope.class_id, term = scope.term, year = scope.year, removed, "registrations removed");
        Ok(removed)
    }

    /// Copy the class's registrations into `term` of the same academic year.
    pub async fn duplicate_registration(
        &self,
        class_id: i64,
        term: i32,
        new_year: i32,
        mode: DuplicationMode,
    ) -> Result<bool, RegistrationError> {
        let scope = RegistrationScope::new(term, new_year, class_id);
        scope.validate()?;

        let mut tx = self.pool.begin().await?;
        let rows = QueryBuilder::table(Table::Results)
            .where_eq("class", class_id)
            .order_by("id", SortDirection::Asc)
            .get_as::<EnrollmentRecord>(&mut tx)
            .await?;

        let batches = plan_duplication(&rows, new_year, term, mode)?;
        let mut total = RegistrationOutcome::default();
        for batch in &batches {
            total.absorb(reconcile(&mut tx, &batch.learners, &batch.courses, &scope).await?);
        }
        tx.commit().await?;

        info!(
            class_id,
            term,
            year = new_year,
            ?mode,
            batches = batches.len(),
            inserted = total.inserted,
            "registration duplicated"
        );
        Ok(true)
    }

    /// Years with registrations for the class, each with its distinct terms
    pub async fn registration_terms(&self, class_id: i64) -> Result<BTreeMap<i32, BTreeSet<i32>>, RegistrationError> {
        let mut conn = self.pool.acquire().await?;
        let rows = QueryExecutor::new(&mut conn)
            .find_by(
                Table::Results.as_str(),
                &["year", "term"],
                &record([("class", json!(class_id))]),
                None,
            )
            .await?
            .into_rows();

        let pairs = rows.iter().filter_map(|row| {
            let year = row.get("year").and_then(Value::as_i64)?;
            let term = row.get("term").and_then(Value::as_i64)?;
            Some((year as i32, term as i32))
        });
        Ok(group_terms(pairs))
    }

    /// Courses the learner holds in scope, ascending
    pub async fn registered_courses(
        &self,
        learner: LearnerId,
        scope: RegistrationScope,
    ) -> Result<Vec<CourseId>, RegistrationError> {
        let mut conn = self.pool.acquire().await?;
        let rows = QueryBuilder::table(Table::Results)
            .where_all(&scope.learner_conditions(learner))
            .order_by("course", SortDirection::Asc)
            .get_as::<EnrollmentRecord>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(|r| CourseId(r.course)).collect())
    }
}

/// Equality conditions for `(class, term, year)`
fn scoped(scope: &RegistrationScope) -> QueryBuilder {
    QueryBuilder::table(Table::Results)
        .where_eq("class", scope.class_id)
        .where_eq("term", scope.term)
        .where_eq("year", scope.year)
}

/// The learners' rows for the scope's year and term, in any class
async fn held_rows(
    conn: &mut PgConnection,
    learners: &[LearnerId],
    scope: &RegistrationScope,
) -> Result<Vec<EnrollmentRecord>, RegistrationError> {
    let mut existing = Vec::new();
    for chunk in learners.chunks(LOOKUP_CHUNK) {
        let rows = QueryBuilder::table(Table::Results)
            .where_eq("year", scope.year)
            .where_eq("term", scope.term)
            .where_in("reg_no", chunk.iter().map(|l| l.0))
            .get_as::<EnrollmentRecord>(&mut *conn)
            .await?;
        existing.extend(rows);
    }
    Ok(existing)
}

/// Insert the missing pairs, then prune each learner down to `courses`.
/// Runs on whatever connection it is handed; callers supply the transaction.
///
/// A desired pair held for the same term under another class fails the call
/// with `ConstraintViolation`.
async fn reconcile(
    conn: &mut PgConnection,
    learners: &[LearnerId],
    courses: &[CourseId],
    scope: &RegistrationScope,
) -> Result<RegistrationOutcome, RegistrationError> {
    let existing = held_rows(&mut *conn, learners, scope).await?;
    let plan = RegistrationPlan::compute(learners, courses, scope, &existing);
    debug!(
        missing = plan.to_insert.len(),
        already_registered = plan.already_registered,
        held_elsewhere = plan.held_elsewhere.len(),
        "registration plan computed"
    );
    if let Some(conflict) = plan.conflict(scope) {
        return Err(conflict.into());
    }

    let mut inserted = 0;
    for chunk in plan.to_insert.chunks(INSERT_CHUNK) {
        let rows: Vec<_> = chunk.iter().map(|pair| pair.to_row(scope)).collect();
        inserted += QueryBuilder::table(Table::Results)
            .insert_many(&mut *conn, &rows, Some(&EnrollmentRecord::NATURAL_KEY[..]))
            .await?;
    }

    // Skipped rows were written by a concurrent caller; they only count if
    // they landed in this class
    let skipped = plan.to_insert.len().saturating_sub(inserted as usize);
    if skipped > 0 {
        let current = held_rows(&mut *conn, learners, scope).await?;
        let recheck = RegistrationPlan::compute(learners, courses, scope, &current);
        if let Some(conflict) = recheck.conflict(scope) {
            return Err(conflict.into());
        }
        if !recheck.to_insert.is_empty() {
            return Err(DatabaseError::ConstraintViolation(
                "Registrations changed while being written; retry the request".to_string(),
            )
            .into());
        }
    }

    let mut pruned = 0;
    for &learner in learners {
        pruned += prune(&mut *conn, learner, courses, scope).await?;
    }

    Ok(RegistrationOutcome {
        learners_processed: learners.len(),
        inserted,
        already_registered: plan.already_registered + skipped,
        pruned,
    })
}

async fn prune(
    conn: &mut PgConnection,
    learner: LearnerId,
    desired: &[CourseId],
    scope: &RegistrationScope,
) -> Result<u64, RegistrationError> {
    if desired.is_empty() {
        return Err(RegistrationError::EmptyCourses);
    }
    let removed = QueryBuilder::table(Table::Results)
        .where_all(&scope.learner_conditions(learner))
        .not_in("course", desired.iter().map(|c| c.0))
        .delete(conn)
        .await?;
    Ok(removed)
}
