use std::path::{Path, PathBuf};

use validata::clean::clean_table;
use validata::eval::{CaseMode, NO_CLIENT};
use validata::table::csv::read_csv_path;
use validata::{AppConfig, BenchmarkRunner, BenchmarkSuite};

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("data").join(name)
}

fn runner_for(suite: &BenchmarkSuite, suite_path: &Path) -> BenchmarkRunner {
    let dataset = suite.dataset_path(suite_path).unwrap();
    let raw = read_csv_path(dataset).unwrap();
    let table = if suite.clean_dataset { clean_table(&raw).table } else { raw };
    BenchmarkRunner::new(AppConfig::default()).with_table(table)
}

#[tokio::test]
async fn test_bundled_offline_suite_passes() {
    let path = data("benchmarks.json");
    let suite = BenchmarkSuite::load(&path).unwrap();
    assert!(suite.cases.iter().all(|c| c.mode == CaseMode::Deterministic));

    let report = runner_for(&suite, &path).run(&suite).await;

    let failures: Vec<_> = report
        .results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| format!("{}: {}", r.id, r.details.join("; ")))
        .collect();
    assert!(failures.is_empty(), "failed cases: {:#?}", failures);
    assert_eq!(report.total(), suite.cases.len());
    assert!(report.all_passed());
}

#[tokio::test]
async fn test_llm_cases_fail_without_client() {
    let path = data("benchmarks_llm.yaml");
    let suite = BenchmarkSuite::load(&path).unwrap();

    let report = runner_for(&suite, &path).run(&suite).await;

    assert_eq!(report.failed(), suite.cases.len());
    assert!(report
        .results
        .iter()
        .all(|r| r.details.iter().any(|d| d == NO_CLIENT)));
}

#[tokio::test]
async fn test_failed_expectation_is_reported() {
    let suite = BenchmarkSuite::from_json(
        r#"{
          "cases": [
            {"id": "wrong-count", "kind": "query",
             "plan": {"operation": "filter", "predicate": {"field": "department", "op": "eq", "value": "Sales"}},
             "expect": {"row_count_equals": 5}},
            {"id": "bad-field", "kind": "query",
             "plan": {"operation": "aggregate", "aggregation": "sum", "target": "bonus"}},
            {"id": "scripted-extract", "kind": "extract",
             "text": "Employee 1, Ana",
             "responses": ["[{\"user_id\": 1, \"name\": \"Ana\"}]"],
             "expect": {"accepted_count": 1}}
          ]
        }"#,
    )
    .unwrap();
    let raw = read_csv_path(data("employees.csv")).unwrap();
    let runner = BenchmarkRunner::new(AppConfig::default()).with_table(clean_table(&raw).table);

    let report = runner.run(&suite).await;

    assert_eq!(report.passed(), 1);
    assert_eq!(report.failed(), 2);
    assert!(report.results[0].details[0].contains("expected 5, got 1"));
    assert!(report.results[1].details[0].contains("bonus"));
    assert!(report.results[2].passed);
    assert!(!report.all_passed());
}
