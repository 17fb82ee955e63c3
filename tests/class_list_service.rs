//! End-to-end behaviour of the report service over the in-memory store.

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use classlist::application::error::ReportError;
use classlist::application::filter::RawReportParams;
use classlist::application::repos::ClassListStore;
use classlist::cache::CacheConfig;

use support::{Counting, Failing, Gated, eventually, memory, service, service_with};

fn params(semester: &str, subject: &str, page: u32, page_size: u32) -> RawReportParams {
    RawReportParams {
        semester: Some(semester.to_string()),
        subject: Some(subject.to_string()),
        page: Some(page.to_string()),
        page_size: Some(page_size.to_string()),
    }
}

#[tokio::test]
async fn first_page_lists_alphabetically_first_students_and_repeats_from_cache() {
    let store = Arc::new(Counting::new(memory()));
    let service = service(store.clone());

    let report = service
        .report(&params("1", "CS101", 1, 2))
        .await
        .expect("report");

    let names: Vec<&str> = report
        .rows
        .iter()
        .map(|row| row.student_name.as_str())
        .collect();
    assert_eq!(names, vec!["Abad", "Bautista"]);
    assert_eq!(report.pagination.total_matching, 6);
    assert_eq!(report.pagination.total_students, 5);
    assert_eq!(report.pagination.total_pages, 3);

    let summary = report.summary.as_ref().expect("summary");
    assert_eq!(summary.instructor, "Reyes");
    assert_eq!(summary.subject, "Intro to Computing");
    assert_eq!(summary.semester, "FirstSem 2023");

    let calls = store.total();
    assert_eq!(calls, 2);

    let again = service
        .report(&params("1", "CS101", 1, 2))
        .await
        .expect("cached report");
    assert_eq!(*again, *report);
    assert_eq!(again.to_response(), report.to_response());
    assert_eq!(store.total(), calls);
}

#[tokio::test]
async fn equivalent_raw_parameters_share_one_cache_entry() {
    let store = Arc::new(Counting::new(memory()));
    let service = service(store.clone());

    service
        .report(&params(" 1 ", "CS101 ", 1, 2))
        .await
        .expect("report");
    service
        .report(&RawReportParams {
            semester: Some("1".to_string()),
            subject: Some("CS101".to_string()),
            page: Some("not-a-number".to_string()),
            page_size: Some("2".to_string()),
        })
        .await
        .expect("report");

    assert_eq!(store.selects(), 1);
    assert_eq!(service.cached_reports(), 1);
}

#[tokio::test]
async fn grade_of_deleted_student_never_appears_on_any_page() {
    let service = service(Arc::new(memory()));

    let mut rows = Vec::new();
    for page in 1..=3 {
        let report = service
            .report(&params("1", "CS101", page, 2))
            .await
            .expect("report");
        assert_eq!(report.pagination.total_matching, 6);
        rows.extend(report.rows.iter().cloned());
    }

    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|row| row.student_id != 99));
    assert!(rows.iter().all(|row| !row.student_name.is_empty()));
}

#[tokio::test]
async fn grade_with_missing_teacher_is_dropped_and_counted() {
    let service = service(Arc::new(memory()));

    let report = service
        .report(&params("2", "CS102", 1, 25))
        .await
        .expect("report");

    let ids: Vec<i64> = report.rows.iter().map(|row| row.grade_id).collect();
    assert_eq!(ids, vec![6, 5, 7]);
    assert_eq!(report.dropped_rows, 1);
    assert_eq!(report.to_response().dropped_rows, 1);
}

#[tokio::test]
async fn pages_cover_the_filtered_result_without_overlap() {
    let service = service(Arc::new(memory()));

    let first = service
        .report(&RawReportParams {
            page_size: Some("2".to_string()),
            ..RawReportParams::default()
        })
        .await
        .expect("first page");
    let total_pages = first.pagination.total_pages;
    assert_eq!(total_pages, 3);

    let mut seen = HashSet::new();
    let mut students = Vec::new();
    for page in 1..=total_pages {
        let report = service
            .report(&RawReportParams {
                page: Some(page.to_string()),
                page_size: Some("2".to_string()),
                ..RawReportParams::default()
            })
            .await
            .expect("page");
        for row in &report.rows {
            assert!(seen.insert(row.grade_id), "grade {} repeated", row.grade_id);
            if students.last() != Some(&row.student_id) {
                students.push(row.student_id);
            }
        }
    }

    let expected: HashSet<i64> = (1..=8).collect();
    assert_eq!(seen, expected);
    assert_eq!(students, vec![2, 4, 3, 1, 5]);

    let past_end = service
        .report(&RawReportParams {
            page: Some("9".to_string()),
            page_size: Some("2".to_string()),
            ..RawReportParams::default()
        })
        .await
        .expect("page past the end");
    assert!(past_end.rows.is_empty());
    assert_eq!(past_end.pagination.total_pages, 3);
}

#[tokio::test]
async fn statistics_stay_consistent_with_rows() {
    let service = service(Arc::new(memory()));
    let filters = [
        ("any", "any"),
        ("1", "CS101"),
        ("2", "CS102"),
        ("1", "any"),
        ("any", "CS102"),
        ("3", "CS101"),
    ];

    for (semester, subject) in filters {
        for page in 1..=3 {
            let report = service
                .report(&params(semester, subject, page, 2))
                .await
                .expect("report");
            let stats = &report.stats;
            assert!(stats.graded <= report.rows.len());
            assert_eq!(stats.enrolled, report.rows.len());
            assert_eq!(stats.average.is_none(), stats.graded == 0);
            assert!(stats.above_average + stats.below_average <= stats.graded);
        }
    }
}

#[tokio::test]
async fn outage_fails_every_waiter_once_and_is_not_cached() {
    let store = Arc::new(Counting::new(Gated::new(Failing::new(memory()))));
    let gated = store.inner();
    let service = Arc::new(service(store.clone()));
    gated.inner().set_outage(true);

    let request = params("1", "CS101", 1, 2);
    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let service = Arc::clone(&service);
            let request = request.clone();
            tokio::spawn(async move { service.report(&request).await })
        })
        .collect();

    eventually(|| gated.arrived() == 1).await;
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    gated.open();

    let mut messages = HashSet::new();
    for waiter in waiters {
        let error = waiter.await.expect("join").expect_err("outage");
        assert!(matches!(
            error,
            ReportError::TransientStore { attempts: 3, .. }
        ));
        messages.insert(error.to_string());
    }
    assert_eq!(messages.len(), 1);
    assert_eq!(store.selects(), 3);
    assert_eq!(service.cached_reports(), 0);

    gated.inner().set_outage(false);
    let report = service.report(&request).await.expect("recovered");
    assert_eq!(report.rows.len(), 2);
    assert_eq!(store.selects(), 4);
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_recomputed_once_for_concurrent_callers() {
    let store = Arc::new(Counting::new(memory()));
    let service = service_with(
        store.clone(),
        CacheConfig {
            ttl: Duration::from_secs(120),
            ..CacheConfig::default()
        },
        Duration::from_secs(30),
    );
    let request = params("1", "CS101", 1, 2);

    service.report(&request).await.expect("warm");
    assert_eq!(store.selects(), 1);

    tokio::time::advance(Duration::from_secs(60)).await;
    service.report(&request).await.expect("fresh hit");
    assert_eq!(store.selects(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    let results = join_all((0..10).map(|_| service.report(&request))).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(store.selects(), 2);
    assert_eq!(store.joins(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_store_turns_into_request_timeout() {
    let gated = Arc::new(Gated::new(memory()));
    let service = service_with(
        gated.clone(),
        CacheConfig::default(),
        Duration::from_millis(50),
    );

    let error = service
        .report(&params("1", "CS101", 1, 2))
        .await
        .expect_err("timeout");
    assert!(matches!(error, ReportError::RequestTimeout(_)));
    assert!(error.is_transient());

    gated.open();
}

#[tokio::test]
async fn invalidation_forces_a_fresh_read() {
    let store = Arc::new(Counting::new(memory()));
    let service = service(store.clone());
    let request = params("2", "CS102", 1, 25);

    service.report(&request).await.expect("report");
    service.invalidate_all();
    assert_eq!(service.cached_reports(), 0);

    store.inner().replace(support::fixture()).await;
    service.report(&request).await.expect("report");
    assert_eq!(store.selects(), 2);
}

#[tokio::test]
async fn filter_options_are_sorted_and_cached() {
    let store = Arc::new(Counting::new(memory()));
    let service = service(store.clone());

    let options = service.filter_options().await.expect("options");
    assert_eq!(options.subjects, vec!["CS101".to_string(), "CS102".to_string()]);
    assert_eq!(options.semesters, vec![1, 2]);

    service.filter_options().await.expect("cached options");
    assert_eq!(store.option_reads(), 2);
}

#[tokio::test]
async fn trait_objects_compose() {
    let store: Arc<dyn ClassListStore> = Arc::new(Failing::new(memory()));
    let report = service(store)
        .report(&RawReportParams::default())
        .await
        .expect("report");
    assert_eq!(report.pagination.total_students, 5);
}
