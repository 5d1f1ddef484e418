mod common;

use chrono::{TimeZone, Utc};
use std::path::Path;

use common::{environment, Answer, RecordingRunner};
use wpfleet::error::LifecycleError;
use wpfleet::models::Environment;
use wpfleet::sync;

#[tokio::test]
async fn test_pull_exports_remote_and_rewrites_urls_locally() {
    let root = Path::new("/work/sites/acme");
    let local = environment(Environment::Local, root);
    let remote = environment(Environment::Staging, root);
    let runner = RecordingRunner::new();
    let now = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();

    let report = sync::pull_database(&runner, &local, &remote, now)
        .await
        .unwrap();

    assert_eq!(report.from_url, "https://acme.test");
    assert_eq!(report.to_url, "http://localhost:8081");
    assert_eq!(report.dump_name, "acme-staging-20260201-120000.sql.gz");

    let calls = runner.calls();
    assert_eq!(calls[0].program, "ssh");
    assert!(calls[0].command_line().contains("wp db export -"));
    let scp = calls.iter().find(|c| c.program == "scp").unwrap();
    assert_eq!(
        scp.args[scp.args.len() - 2..],
        [
            "deploy@203.0.113.10:/home/acme.test/backups/acme-staging-20260201-120000.sql.gz"
                .to_string(),
            "/work/sites/acme/backups/acme-staging-20260201-120000.sql.gz".to_string(),
        ]
    );
    let replace = calls
        .iter()
        .find(|c| c.command_line().contains("search-replace"))
        .unwrap();
    assert_eq!(replace.program, "bash");
    assert!(replace
        .command_line()
        .contains("wp search-replace https://acme.test http://localhost:8081"));
}

#[tokio::test]
async fn test_push_requires_confirmation() {
    let root = Path::new("/work/sites/acme");
    let local = environment(Environment::Local, root);
    let remote = environment(Environment::Production, root);
    let runner = RecordingRunner::new();

    let err = sync::push_database(&runner, &local, &remote, &Answer(false), Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<LifecycleError>(),
        Some(LifecycleError::Declined { .. })
    ));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_push_imports_on_remote() {
    let root = Path::new("/work/sites/acme");
    let local = environment(Environment::Local, root);
    let remote = environment(Environment::Production, root);
    let runner = RecordingRunner::new();

    sync::push_database(&runner, &local, &remote, &Answer(true), Utc::now())
        .await
        .unwrap();

    let import = runner
        .calls()
        .into_iter()
        .find(|c| c.command_line().contains("wp db import"))
        .unwrap();
    assert_eq!(import.program, "ssh");
    let export_pos = runner.position("wp db export").unwrap();
    let scp_pos = runner.position("scp").unwrap();
    let replace_pos = runner.position("search-replace").unwrap();
    assert!(export_pos < scp_pos && scp_pos < replace_pos);
}
