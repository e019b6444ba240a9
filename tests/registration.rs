#[macro_use]
mod common;

use anyhow::Result;
use serde_json::json;

use school_portal::database::record::record;
use school_portal::database::{repository, DatabaseError};
use school_portal::services::{
    CourseId, CourseRef, DuplicationMode, LearnerId, LearnerRef, RegistrationError, RegistrationScope,
    RegistrationService,
};

fn learners(ids: &[i64]) -> Vec<LearnerRef> {
    ids.iter().map(|&id| LearnerRef::from(LearnerId(id))).collect()
}

fn courses(ids: &[i64]) -> Vec<CourseRef> {
    ids.iter().map(|&id| CourseRef::from(CourseId(id))).collect()
}

fn ids(courses: Vec<CourseId>) -> Vec<i64> {
    courses.into_iter().map(|c| c.0).collect()
}

#[tokio::test]
async fn register_replaces_stale_courses() -> Result<()> {
    let db = test_db!();
    let scope = RegistrationScope::new(1, 2024, 3);
    db.enroll(501, 7, 1, 2024, 3).await?;
    db.enroll(501, 8, 1, 2024, 3).await?;

    let service = RegistrationService::new(db.pool.clone());
    assert!(service.register(&learners(&[501]), &courses(&[7, 9]), scope).await?);

    assert_eq!(ids(service.registered_courses(LearnerId(501), scope).await?), vec![7, 9]);

    db.cleanup().await
}

#[tokio::test]
async fn register_is_idempotent() -> Result<()> {
    let db = test_db!();
    let scope = RegistrationScope::new(1, 2024, 3);
    let service = RegistrationService::new(db.pool.clone());

    let first = service
        .register_detailed(&learners(&[501, 502]), &courses(&[7, 9]), scope)
        .await?;
    assert_eq!(first.inserted, 4);

    let second = service
        .register_detailed(&learners(&[501, 502]), &courses(&[7, 9]), scope)
        .await?;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.already_registered, 4);
    assert_eq!(second.pruned, 0);
    assert_eq!(db.count_rows(record([("class", json!(3))])).await?, 4);

    db.cleanup().await
}

#[tokio::test]
async fn register_leaves_other_scopes_alone() -> Result<()> {
    let db = test_db!();
    let scope = RegistrationScope::new(1, 2024, 3);
    // Same learner, other term and other class
    db.enroll(501, 8, 2, 2024, 3).await?;
    db.enroll(501, 11, 1, 2024, 4).await?;
    // Other learner in the same scope
    db.enroll(502, 8, 1, 2024, 3).await?;

    let service = RegistrationService::new(db.pool.clone());
    service.register(&learners(&[501]), &courses(&[7]), scope).await?;

    assert_eq!(ids(service.registered_courses(LearnerId(501), scope).await?), vec![7]);
    assert_eq!(
        ids(service.registered_courses(LearnerId(501), RegistrationScope::new(2, 2024, 3)).await?),
        vec![8]
    );
    assert_eq!(
        ids(service.registered_courses(LearnerId(501), RegistrationScope::new(1, 2024, 4)).await?),
        vec![11]
    );
    assert_eq!(ids(service.registered_courses(LearnerId(502), scope).await?), vec![8]);

    db.cleanup().await
}

#[tokio::test]
async fn course_held_under_another_class_is_a_conflict() -> Result<()> {
    let db = test_db!();
    let scope = RegistrationScope::new(1, 2024, 3);
    db.enroll(501, 7, 1, 2024, 4).await?;
    db.enroll(501, 8, 1, 2024, 3).await?;

    let service = RegistrationService::new(db.pool.clone());
    let err = service.register(&learners(&[501]), &courses(&[7]), scope).await.unwrap_err();
    assert!(
        matches!(err, RegistrationError::Database(DatabaseError::ConstraintViolation(_))),
        "{err:?}"
    );

    // Neither class changed
    assert_eq!(ids(service.registered_courses(LearnerId(501), scope).await?), vec![8]);
    assert_eq!(
        ids(service.registered_courses(LearnerId(501), RegistrationScope::new(1, 2024, 4)).await?),
        vec![7]
    );

    db.cleanup().await
}

/// Refuses to delete learner 502's rows, so a reconciliation fails after
/// earlier inserts and prunes already ran in the same transaction
const REFUSE_PRUNE_OF_502: &str = r#"
CREATE FUNCTION refuse_prune() RETURNS trigger AS $$
BEGIN
    IF OLD.reg_no = 502 THEN
        RAISE EXCEPTION 'prune refused for learner %', OLD.reg_no;
    END IF;
    RETURN OLD;
END
$$ LANGUAGE plpgsql;

CREATE TRIGGER refuse_prune BEFORE DELETE ON result_table
    FOR EACH ROW EXECUTE FUNCTION refuse_prune();
"#;

#[tokio::test]
async fn failed_register_rolls_back_inserts_and_prunes() -> Result<()> {
    let db = test_db!();
    let scope = RegistrationScope::new(1, 2024, 3);
    db.enroll(501, 8, 1, 2024, 3).await?;
    db.enroll(502, 5, 1, 2024, 3).await?;
    db.execute(REFUSE_PRUNE_OF_502).await?;

    let service = RegistrationService::new(db.pool.clone());
    let result = service.register(&learners(&[501, 502]), &courses(&[7, 9]), scope).await;
    assert!(result.is_err());

    // 501's inserts and prune ran before 502's prune failed; none of it stuck
    assert_eq!(ids(service.registered_courses(LearnerId(501), scope).await?), vec![8]);
    assert_eq!(ids(service.registered_courses(LearnerId(502), scope).await?), vec![5]);
    assert_eq!(db.count_rows(record([("class", json!(3))])).await?, 2);

    db.cleanup().await
}

#[tokio::test]
async fn failed_duplicate_rolls_back_every_batch() -> Result<()> {
    let db = test_db!();
    db.enroll(501, 7, 1, 2024, 3).await?;
    db.enroll(502, 9, 1, 2024, 3).await?;
    db.enroll(502, 5, 2, 2024, 3).await?;
    db.execute(REFUSE_PRUNE_OF_502).await?;

    let service = RegistrationService::new(db.pool.clone());
    let result = service.duplicate_registration(3, 2, 2024, DuplicationMode::ExactPairs).await;
    assert!(result.is_err());

    let term2 = RegistrationScope::new(2, 2024, 3);
    assert!(service.registered_courses(LearnerId(501), term2).await?.is_empty());
    assert_eq!(ids(service.registered_courses(LearnerId(502), term2).await?), vec![5]);

    db.cleanup().await
}

#[tokio::test]
async fn empty_lists_are_rejected_without_writes() -> Result<()> {
    let db = test_db!();
    let scope = RegistrationScope::new(1, 2024, 3);
    db.enroll(501, 7, 1, 2024, 3).await?;
    let service = RegistrationService::new(db.pool.clone());

    let err = service.register(&learners(&[501]), &[], scope).await.unwrap_err();
    assert!(matches!(err, RegistrationError::EmptyCourses));

    let err = service.register(&[], &courses(&[7]), scope).await.unwrap_err();
    assert!(matches!(err, RegistrationError::EmptyLearners));

    let err = service.prune_stale(&learners(&[501])[0], &[], scope).await.unwrap_err();
    assert!(matches!(err, RegistrationError::EmptyCourses));

    assert_eq!(db.count_rows(record([("reg_no", json!(501))])).await?, 1);

    db.cleanup().await
}

#[tokio::test]
async fn prune_stale_keeps_only_desired() -> Result<()> {
    let db = test_db!();
    let scope = RegistrationScope::new(1, 2024, 3);
    for course in [7, 8, 9] {
        db.enroll(501, course, 1, 2024, 3).await?;
    }

    let service = RegistrationService::new(db.pool.clone());
    let removed = service.prune_stale(&learners(&[501])[0], &courses(&[8]), scope).await?;
    assert_eq!(removed, 2);
    assert_eq!(ids(service.registered_courses(LearnerId(501), scope).await?), vec![8]);

    db.cleanup().await
}

#[tokio::test]
async fn register_class_loads_current_members() -> Result<()> {
    let db = test_db!();
    let class_id = repository::classes(db.pool.clone())
        .create(&record([("class_name", json!("JSS 1A"))]))
        .await?;
    let other_class = repository::classes(db.pool.clone())
        .create(&record([("class_name", json!("JSS 1B"))]))
        .await?;

    let students = repository::learners(db.pool.clone());
    let ada = students
        .create(&record([("surname", json!("Obi")), ("student_class", json!(class_id))]))
        .await?;
    let tunde = students
        .create(&record([("surname", json!("Bello")), ("student_class", json!(class_id))]))
        .await?;
    let outsider = students
        .create(&record([("surname", json!("Eze")), ("student_class", json!(other_class))]))
        .await?;

    let scope = RegistrationScope::new(1, 2024, class_id);
    let service = RegistrationService::new(db.pool.clone());
    let outcome = service.register_class(&courses(&[7]), scope).await?;
    assert_eq!(outcome.learners_processed, 2);

    assert_eq!(ids(service.registered_courses(LearnerId(ada), scope).await?), vec![7]);
    assert_eq!(ids(service.registered_courses(LearnerId(tunde), scope).await?), vec![7]);
    assert!(service.registered_courses(LearnerId(outsider), scope).await?.is_empty());

    db.cleanup().await
}

#[tokio::test]
async fn register_class_without_members_is_rejected() -> Result<()> {
    let db = test_db!();
    let class_id = repository::classes(db.pool.clone())
        .create(&record([("class_name", json!("Empty"))]))
        .await?;

    let err = RegistrationService::new(db.pool.clone())
        .register_class(&courses(&[7]), RegistrationScope::new(1, 2024, class_id))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::EmptyLearners));

    db.cleanup().await
}

#[tokio::test]
async fn duplicate_rejects_year_change() -> Result<()> {
    let db = test_db!();
    db.enroll(501, 7, 3, 2023, 3).await?;

    let service = RegistrationService::new(db.pool.clone());
    let err = service
        .duplicate_registration(3, 1, 2024, DuplicationMode::ExactPairs)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistrationError::AcademicYearMismatch { existing: 2023, requested: 2024 }
    ));
    assert_eq!(db.count_rows(record([("class", json!(3))])).await?, 1);

    db.cleanup().await
}

#[tokio::test]
async fn duplicate_without_rows_is_not_found() -> Result<()> {
    let db = test_db!();
    let err = RegistrationService::new(db.pool.clone())
        .duplicate_registration(3, 2, 2024, DuplicationMode::ExactPairs)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::NotFound(_)));

    db.cleanup().await
}

#[tokio::test]
async fn duplicate_replays_exact_pairs_by_default() -> Result<()> {
    let db = test_db!();
    db.enroll(501, 7, 1, 2024, 3).await?;
    db.enroll(501, 8, 1, 2024, 3).await?;
    db.enroll(502, 9, 1, 2024, 3).await?;

    let service = RegistrationService::new(db.pool.clone());
    assert!(service.duplicate_registration(3, 2, 2024, DuplicationMode::ExactPairs).await?);

    let term2 = RegistrationScope::new(2, 2024, 3);
    assert_eq!(ids(service.registered_courses(LearnerId(501), term2).await?), vec![7, 8]);
    assert_eq!(ids(service.registered_courses(LearnerId(502), term2).await?), vec![9]);

    db.cleanup().await
}

#[tokio::test]
async fn duplicate_copies_the_latest_term_not_the_whole_year() -> Result<()> {
    let db = test_db!();
    db.enroll(501, 7, 1, 2024, 3).await?;
    db.enroll(501, 8, 1, 2024, 3).await?;
    db.enroll(501, 9, 2, 2024, 3).await?;

    let service = RegistrationService::new(db.pool.clone());
    service.duplicate_registration(3, 3, 2024, DuplicationMode::ExactPairs).await?;

    let term3 = RegistrationScope::new(3, 2024, 3);
    assert_eq!(ids(service.registered_courses(LearnerId(501), term3).await?), vec![9]);

    db.cleanup().await
}

#[tokio::test]
async fn duplicate_cross_product_gives_everyone_everything() -> Result<()> {
    let db = test_db!();
    db.enroll(501, 7, 1, 2024, 3).await?;
    db.enroll(502, 9, 1, 2024, 3).await?;

    let service = RegistrationService::new(db.pool.clone());
    service.duplicate_registration(3, 2, 2024, DuplicationMode::CrossProduct).await?;

    let term2 = RegistrationScope::new(2, 2024, 3);
    assert_eq!(ids(service.registered_courses(LearnerId(501), term2).await?), vec![7, 9]);
    assert_eq!(ids(service.registered_courses(LearnerId(502), term2).await?), vec![7, 9]);

    db.cleanup().await
}

#[tokio::test]
async fn unregister_removes_only_requested_pairs() -> Result<()> {
    let db = test_db!();
    let scope = RegistrationScope::new(1, 2024, 3);
    for course in [7, 8] {
        db.enroll(501, course, 1, 2024, 3).await?;
        db.enroll(502, course, 1, 2024, 3).await?;
    }

    let service = RegistrationService::new(db.pool.clone());
    assert_eq!(service.unregister(&learners(&[501]), &courses(&[8]), scope).await?, 1);
    assert_eq!(ids(service.registered_courses(LearnerId(501), scope).await?), vec![7]);

    assert_eq!(service.unregister_all(&learners(&[502])[0], scope).await?, 2);
    assert!(service.registered_courses(LearnerId(502), scope).await?.is_empty());
    assert_eq!(ids(service.registered_courses(LearnerId(501), scope).await?), vec![7]);

    db.cleanup().await
}

#[tokio::test]
async fn registration_terms_group_by_year() -> Result<()> {
    let db = test_db!();
    db.enroll(501, 7, 1, 2023, 3).await?;
    db.enroll(501, 7, 1, 2024, 3).await?;
    db.enroll(501, 8, 1, 2024, 3).await?;
    db.enroll(501, 7, 2, 2024, 3).await?;
    db.enroll(501, 7, 3, 2024, 4).await?;

    let terms = RegistrationService::new(db.pool.clone()).registration_terms(3).await?;
    assert_eq!(terms.keys().copied().collect::<Vec<_>>(), vec![2023, 2024]);
    assert_eq!(terms[&2024].iter().copied().collect::<Vec<_>>(), vec![1, 2]);

    db.cleanup().await
}
