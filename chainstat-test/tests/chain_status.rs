// End-to-end chain-status scenarios against a scripted upstream server.

use std::sync::Arc;

use chainstat_core::chain::{ChainProcessor, expand};
use chainstat_core::connect::ConnectionCache;
use chainstat_core::types::{
    AggregatedChainStatus, BuildId, ChainOutcome, PROBLEM_COMPILATION, PROBLEM_EXECUTION_TIMEOUT,
    PROBLEM_EXIT_CODE, PROBLEM_FAILED_TESTS, PROBLEM_JVM_CRASH, PROBLEM_OOME, STATUS_FAILURE,
    STATUS_SUCCESS, STATUS_UNKNOWN,
};
use chainstat_test::{ChainFixture, FixtureBuild, TestCreds};

/// The canonical pull-request chain: a failing suite with one failing test
/// and a cancelled suite, under a failing composite root.
fn pr_chain() -> Vec<FixtureBuild> {
    vec![
        FixtureBuild::new(1000, "IgniteTests_RunAll", "Run :: All")
            .status(STATUS_FAILURE)
            .deps(&[1001, 1002]),
        FixtureBuild::new(1001, "IgniteTests_Cache1", "Cache 1")
            .status(STATUS_FAILURE)
            .test("CacheTest#testPut", STATUS_SUCCESS, 120, 10)
            .test("CacheTest#testGet", STATUS_SUCCESS, 80, 10)
            .test("CacheTest#testX", STATUS_FAILURE, 200, 40)
            .problem(PROBLEM_COMPILATION),
        FixtureBuild::new(1002, "IgniteTests_Cache2", "Cache 2").status(STATUS_UNKNOWN),
    ]
}

fn processor(fixture: &ChainFixture) -> ChainProcessor {
    let cache = Arc::new(ConnectionCache::new(ChainFixture::config(), fixture.factory()));
    ChainProcessor::new(cache)
}

async fn status_of(
    processor: &ChainProcessor,
    root: i32,
) -> anyhow::Result<AggregatedChainStatus> {
    match processor
        .chain_status(BuildId(root), None, "apache", TestCreds::allowing("bob"))
        .await?
    {
        ChainOutcome::Status(status) => Ok(*status),
        other => anyhow::bail!("expected a summarized chain, got {other:?}"),
    }
}

#[tokio::test]
async fn pr_chain_counts_and_new_failure_flag() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(pr_chain());
    let processor = processor(&fixture);

    let status = status_of(&processor, 1000).await?;

    assert_eq!(status.root_id, BuildId(1000));
    assert_eq!(status.branch, "pull/4931/head");
    assert_eq!(status.failed_tests, 1);
    // The compile-broken suite failed to finish; the cancelled one carried
    // no problems and does not count.
    assert_eq!(status.failed_to_finish, 1);
    assert!(!status.deps_not_found);

    let suites: Vec<&str> = status.suites.iter().map(|s| s.suite.as_str()).collect();
    assert_eq!(suites, vec!["Cache 1", "Cache 2"]);
    assert!(status.suites[0].failed_to_finish);
    assert!(!status.suites[1].failed_to_finish);
    assert_eq!(status.suites[1].status, STATUS_UNKNOWN);

    // No baseline history cached: the failure classifies as new.
    let failures = &status.suites[0].test_failures;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "CacheTest#testX");
    assert!(failures[0].new_failure);
    Ok(())
}

#[tokio::test]
async fn baseline_history_clears_the_new_flag() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(pr_chain());
    // Ten master-branch builds where testX already ran (and failed).
    fixture
        .seed_history(
            "refs/heads/master",
            10,
            &[("CacheTest#testX", STATUS_FAILURE)],
        )
        .await;
    let processor = processor(&fixture);

    let status = status_of(&processor, 1000).await?;
    let failures = &status.suites[0].test_failures;
    assert_eq!(failures[0].name, "CacheTest#testX");
    assert!(
        !failures[0].new_failure,
        "a test with baseline history is not a new failure"
    );
    Ok(())
}

#[tokio::test]
async fn unseen_test_stays_new_despite_other_history() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(pr_chain());
    fixture
        .seed_history(
            "refs/heads/master",
            10,
            &[("CacheTest#testPut", STATUS_SUCCESS)],
        )
        .await;
    let processor = processor(&fixture);

    let status = status_of(&processor, 1000).await?;
    assert!(status.suites[0].test_failures[0].new_failure);
    Ok(())
}

#[tokio::test]
async fn missing_root_reports_chain_not_found() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(pr_chain());
    let processor = processor(&fixture);

    let outcome = processor
        .chain_status(BuildId(9999), None, "apache", TestCreds::allowing("bob"))
        .await?;
    assert_eq!(outcome, ChainOutcome::ChainNotFound);
    Ok(())
}

#[tokio::test]
async fn denied_credentials_never_reach_upstream() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(pr_chain());
    let processor = processor(&fixture);

    let outcome = processor
        .chain_status(BuildId(1000), None, "apache", TestCreds::denying("mallory"))
        .await?;
    assert_eq!(outcome, ChainOutcome::AccessDenied);
    assert_eq!(fixture.upstream.build_fetches(), 0);
    Ok(())
}

#[tokio::test]
async fn finished_builds_are_fetched_once() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(pr_chain());
    let processor = processor(&fixture);

    let first = status_of(&processor, 1000).await?;
    let fetches_after_first = fixture.upstream.build_fetches();
    assert_eq!(fetches_after_first, 3);

    let second = status_of(&processor, 1000).await?;
    assert_eq!(
        fixture.upstream.build_fetches(),
        fetches_after_first,
        "second request must be served from the build store"
    );
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn missing_dependency_yields_partial_summary() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(vec![
        FixtureBuild::new(1, "Root", "Run :: All")
            .status(STATUS_FAILURE)
            .deps(&[2, 77]),
        FixtureBuild::new(2, "Cache1", "Cache 1")
            .status(STATUS_FAILURE)
            .test("T#a", STATUS_FAILURE, 50, 0)
            .problem(PROBLEM_FAILED_TESTS),
    ]);
    let processor = processor(&fixture);

    let status = status_of(&processor, 1).await?;
    assert!(status.deps_not_found);
    assert_eq!(status.failed_tests, 1);
    Ok(())
}

#[tokio::test]
async fn total_sums_exactly_the_four_known_counters() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(vec![
        FixtureBuild::new(1, "Root", "Run :: All")
            .status(STATUS_FAILURE)
            .deps(&[2, 3, 4, 5]),
        FixtureBuild::new(2, "A", "A")
            .status(STATUS_FAILURE)
            .problem(PROBLEM_EXECUTION_TIMEOUT)
            .problem(PROBLEM_COMPILATION),
        FixtureBuild::new(3, "B", "B")
            .status(STATUS_FAILURE)
            .problem(PROBLEM_JVM_CRASH),
        FixtureBuild::new(4, "C", "C")
            .status(STATUS_FAILURE)
            .problem(PROBLEM_OOME),
        FixtureBuild::new(5, "D", "D")
            .status(STATUS_FAILURE)
            .problem(PROBLEM_EXIT_CODE),
    ]);
    let processor = processor(&fixture);

    let status = status_of(&processor, 1).await?;
    assert_eq!(status.problems.execution_timeout, 1);
    assert_eq!(status.problems.jvm_crash, 1);
    assert_eq!(status.problems.oome, 1);
    assert_eq!(status.problems.exit_code, 1);
    // The compilation problem is counted nowhere: TOTAL covers only the
    // four named categories.
    assert_eq!(status.problems.total, 4);
    Ok(())
}

#[tokio::test]
async fn diamond_chain_expands_shared_dependency_once() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(vec![
        FixtureBuild::new(1, "Root", "Root").deps(&[2, 3]),
        FixtureBuild::new(2, "A", "A").deps(&[4]),
        FixtureBuild::new(3, "B", "B").deps(&[4]),
        FixtureBuild::new(4, "Shared", "Shared"),
    ]);
    let handle = fixture.handle("apache");

    let expansion = expand(&handle, BuildId(1)).await?.expect("root exists");
    let ids: Vec<i32> = expansion.records.iter().map(|r| r.id.0).collect();
    assert_eq!(ids, vec![1, 2, 4, 3]);
    assert_eq!(fixture.upstream.build_fetches(), 4);
    Ok(())
}

#[tokio::test]
async fn top_rankings_survive_the_full_pipeline() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(vec![
        FixtureBuild::new(1, "Root", "Run :: All")
            .status(STATUS_SUCCESS)
            .deps(&[2]),
        FixtureBuild::new(2, "Cache1", "Cache 1")
            .status(STATUS_SUCCESS)
            .test("T#slow", STATUS_SUCCESS, 9000, 5)
            .test("T#mid", STATUS_SUCCESS, 4000, 50)
            .test("T#fast", STATUS_SUCCESS, 10, 500)
            .test("T#tiny", STATUS_SUCCESS, 5, 1),
    ]);
    let processor = processor(&fixture);

    let status = status_of(&processor, 1).await?;
    let slow: Vec<&str> = status.top_slow.iter().map(|r| r.test.as_str()).collect();
    assert_eq!(slow, vec!["T#slow", "T#mid", "T#fast"]);
    let log: Vec<&str> = status.top_log.iter().map(|r| r.test.as_str()).collect();
    assert_eq!(log, vec!["T#fast", "T#mid", "T#slow"]);
    Ok(())
}

#[tokio::test]
async fn json_serialization_of_the_aggregate_is_stable() -> anyhow::Result<()> {
    let fixture = ChainFixture::new(pr_chain());
    let processor = processor(&fixture);

    let status = status_of(&processor, 1000).await?;
    let json = serde_json::to_value(&status)?;
    assert_eq!(json["failed_tests"], 1);
    assert_eq!(json["problems"]["total"], 0);
    assert_eq!(json["suites"][0]["suite"], "Cache 1");
    Ok(())
}
