mod common;

use std::path::Path;

use common::{environment, RecordingRunner};
use wpfleet::deploy::{self, DeployOptions};
use wpfleet::error::LifecycleError;
use wpfleet::exec::CommandOutput;
use wpfleet::models::Environment;

#[tokio::test]
async fn test_deploy_runs_every_substep_in_order() {
    let env = environment(Environment::Production, Path::new("/work/sites/acme"));
    let runner = RecordingRunner::new();

    let report = deploy::deploy(&runner, &env, &DeployOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.steps,
        vec![
            "composer install",
            "rsync",
            "chown",
            "chmod directories",
            "chmod files",
            "chmod uploads",
            "chmod secrets",
        ]
    );

    let calls = runner.calls();
    assert_eq!(calls.len(), 7);
    assert_eq!(calls[0].program, "composer");
    assert_eq!(calls[0].cwd.as_deref(), Some(Path::new("/work/sites/acme")));
    assert_eq!(calls[1].program, "rsync");
    assert!(calls[1].args.contains(&"--exclude=.env*".to_string()));
    assert!(calls[2..].iter().all(|c| c.program == "ssh"));
    assert!(calls[2..]
        .iter()
        .all(|c| c.args.contains(&"deploy@203.0.113.10".to_string())));
}

#[tokio::test]
async fn test_failing_substep_is_named() {
    let env = environment(Environment::Staging, Path::new("/work/sites/acme"));
    let runner = RecordingRunner::new();
    runner.respond(
        "chown -R",
        CommandOutput::failed(1, "chown: invalid user: 'acme:acme'"),
    );

    let err = deploy::deploy(&runner, &env, &DeployOptions::default())
        .await
        .unwrap_err();

    match err.downcast_ref::<LifecycleError>() {
        Some(LifecycleError::ExternalTool { step, output, .. }) => {
            assert_eq!(step, "chown");
            assert!(output.contains("invalid user"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(runner.count("chmod"), 0);
}

#[tokio::test]
async fn test_dry_run_only_previews_rsync() {
    let env = environment(Environment::Production, Path::new("/work/sites/acme"));
    let runner = RecordingRunner::new();
    runner.respond("rsync", CommandOutput::ok("<f.st...... web/app/themes/acme/style.css\n"));
    let options = DeployOptions {
        dry_run: true,
        ..Default::default()
    };

    let report = deploy::deploy(&runner, &env, &options).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.steps, vec!["rsync"]);
    assert!(report.changes.contains("style.css"));
    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].args.contains(&"--dry-run".to_string()));
}

#[tokio::test]
async fn test_local_environment_is_not_a_deploy_target() {
    let env = environment(Environment::Local, Path::new("/work/sites/acme"));
    let runner = RecordingRunner::new();

    let err = deploy::deploy(&runner, &env, &DeployOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<LifecycleError>(),
        Some(LifecycleError::Configuration(_))
    ));
    assert!(runner.calls().is_empty());
}
