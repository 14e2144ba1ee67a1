use std::sync::Arc;

use futures::TryStreamExt;
use sqlx::PgPool;

use instructor_task::models::{LearnerId, SubmissionRecord};
use instructor_task::records::{
    PgSubmissionSource, RecordFilter, RecordPredicate, RecordQuery, SubmissionSource,
};

const COURSE: &str = "course-v1:Org+C1+2024";
const PROBLEM: &str = "block@P1";

async fn insert_record(pool: &PgPool, problem: &str, student_id: i64, done: bool) -> i64 {
    sqlx::query_scalar(
        r#"
        INSERT INTO courseware_studentmodule (course_id, module_state_key, student_id, state)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(COURSE)
    .bind(problem)
    .bind(student_id)
    .bind(format!(r#"{{"attempts": 2, "done": {done}}}"#))
    .fetch_one(pool)
    .await
    .expect("Failed to insert submission record")
}

/// Four records for the problem plus a record for another problem.
async fn seed(pool: &PgPool) -> Vec<i64> {
    let mut ids = Vec::new();
    for (student_id, done) in [(1, true), (2, false), (3, true), (4, true)] {
        ids.push(insert_record(pool, PROBLEM, student_id, done).await);
    }
    insert_record(pool, "block@P2", 1, true).await;
    ids
}

fn ids(records: &[SubmissionRecord]) -> Vec<i64> {
    records.iter().map(|r| r.id).collect()
}

#[sqlx::test(migrator = "instructor_task::database::MIGRATOR")]
async fn test_count_scopes_to_problem_and_learner(pool: PgPool) {
    seed(&pool).await;
    let source = PgSubmissionSource::new(pool);

    let query = RecordQuery::new(COURSE, PROBLEM);
    assert_eq!(source.count(&query).await.unwrap(), 4);
    assert_eq!(
        source
            .count(&query.clone().for_learner(LearnerId(3)))
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        source
            .count(&RecordQuery::new(COURSE, "block@missing"))
            .await
            .unwrap(),
        0
    );
}

#[sqlx::test(migrator = "instructor_task::database::MIGRATOR")]
async fn test_fetch_page_across_exact_page_boundary(pool: PgPool) {
    let seeded = seed(&pool).await;
    let source = PgSubmissionSource::new(pool);
    let query = RecordQuery::new(COURSE, PROBLEM);

    let first = source.fetch_page(&query, None, 2).await.unwrap();
    assert_eq!(ids(&first), seeded[..2].to_vec());

    let second = source
        .fetch_page(&query, first.last().map(|r| r.id), 2)
        .await
        .unwrap();
    assert_eq!(ids(&second), seeded[2..].to_vec());

    let third = source
        .fetch_page(&query, second.last().map(|r| r.id), 2)
        .await
        .unwrap();
    assert!(third.is_empty());
}

#[sqlx::test(migrator = "instructor_task::database::MIGRATOR")]
async fn test_rows_map_to_submission_records(pool: PgPool) {
    let seeded = seed(&pool).await;
    let source = PgSubmissionSource::new(pool);
    let query = RecordQuery::new(COURSE, PROBLEM).for_learner(LearnerId(2));

    let page = source.fetch_page(&query, None, 10).await.unwrap();
    assert_eq!(page.len(), 1);

    let record = &page[0];
    assert_eq!(record.id, seeded[1]);
    assert_eq!(record.course_id, COURSE);
    assert_eq!(record.problem_url, PROBLEM);
    assert_eq!(record.learner_id, LearnerId(2));
    assert!(!record.attempt_done());
    assert!(query.matches(record));
}

#[sqlx::test(migrator = "instructor_task::database::MIGRATOR")]
async fn test_filter_streams_done_attempts_in_id_order(pool: PgPool) {
    let seeded = seed(&pool).await;
    let filter = RecordFilter::new(Arc::new(PgSubmissionSource::new(pool)), 2)
        .with_predicates([RecordPredicate::AttemptDone]);
    let query = RecordQuery::new(COURSE, PROBLEM);

    let all: Vec<SubmissionRecord> = filter.select(query.clone()).try_collect().await.unwrap();
    assert_eq!(ids(&all), vec![seeded[0], seeded[2], seeded[3]]);

    let resumed: Vec<SubmissionRecord> = filter
        .select_after(query, Some(seeded[2]))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(ids(&resumed), vec![seeded[3]]);
}
