use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn wpfleet_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("wpfleet");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let template_dir = root.join("template");
    fs::create_dir_all(template_dir.join("config")).unwrap();
    fs::write(
        template_dir.join("docker-compose.yml"),
        "services:\n  web:\n    container_name: {{SITE_NAME}}_web\n    ports:\n      - \"{{PORT}}:80\"\n",
    )
    .unwrap();
    fs::write(
        template_dir.join("config/application.php"),
        "<?php\nConfig::define('WP_HOME', '{{LOCAL_URL}}');\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[paths]
sites_file = "{root}/config/sites.toml"
sites_root = "{root}/sites"
template_dir = "{root}/template"

[secrets]
salt_url = "http://127.0.0.1:9/"
timeout_secs = 2

[dns]
provider = "disabled"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("wpfleet.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_wpfleet(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = wpfleet_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run wpfleet binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn init_acme(config_path: &Path) {
    let (stdout, stderr, success) = run_wpfleet(
        config_path,
        &["site", "init", "acme", "--port", "8081", "--domain", "acme.test"],
    );
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_site_init_reports_and_registers() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_wpfleet(
        &config_path,
        &["site", "init", "acme", "--port", "8081", "--domain", "acme.test"],
    );
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("DB name:     acme_db"));
    assert!(stdout.contains("Placeholders: all resolved"));
    assert!(stdout.contains("ok"));

    let compose = fs::read_to_string(tmp.path().join("sites/acme/docker-compose.yml")).unwrap();
    assert!(compose.contains("acme_web"));
    assert!(tmp.path().join("sites/acme/.env.production").exists());

    let (stdout, _, success) = run_wpfleet(&config_path, &["site", "list"]);
    assert!(success);
    assert!(stdout.contains("acme"));
    assert!(stdout.contains("local,production,staging"));
}

#[test]
fn test_site_init_twice_fails() {
    let (_tmp, config_path) = setup_test_env();
    init_acme(&config_path);

    let (_, stderr, success) = run_wpfleet(
        &config_path,
        &["site", "init", "acme", "--port", "8082", "--domain", "acme.test"],
    );
    assert!(!success);
    assert!(stderr.contains("already exists"), "stderr={}", stderr);
}

#[test]
fn test_site_set_then_show_hides_password() {
    let (_tmp, config_path) = setup_test_env();
    init_acme(&config_path);

    let (stdout, stderr, success) = run_wpfleet(
        &config_path,
        &[
            "site",
            "set",
            "acme",
            "production",
            "ssh_host=203.0.113.10",
            "object_store_remote=b2:fleet",
        ],
    );
    assert!(success, "set failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Updated 2 field(s) for acme/production"));

    let (stdout, _, success) = run_wpfleet(&config_path, &["site", "show", "acme", "production"]);
    assert!(success);
    assert!(stdout.contains("203.0.113.10"));
    assert!(stdout.contains("b2:fleet"));
    let pass_line = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("db_pass"))
        .unwrap();
    assert!(pass_line.ends_with("<set>"), "{}", pass_line);
    assert!(stdout.contains("<missing>"));
}

#[test]
fn test_site_set_rejects_unknown_field() {
    let (_tmp, config_path) = setup_test_env();
    init_acme(&config_path);

    let (_, stderr, success) = run_wpfleet(
        &config_path,
        &["site", "set", "acme", "staging", "ssh_hots=203.0.113.10"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown field 'ssh_hots'"), "stderr={}", stderr);
}

#[test]
fn test_provision_refuses_local() {
    let (_tmp, config_path) = setup_test_env();
    init_acme(&config_path);

    let (_, stderr, success) = run_wpfleet(&config_path, &["provision", "acme", "local"]);
    assert!(!success);
    assert!(stderr.contains("staging or production"), "stderr={}", stderr);
}

#[test]
fn test_deploy_reports_missing_fields() {
    let (_tmp, config_path) = setup_test_env();
    init_acme(&config_path);

    let (_, stderr, success) = run_wpfleet(&config_path, &["deploy", "acme", "staging"]);
    assert!(!success);
    assert!(stderr.contains("ssh_host"), "stderr={}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) =
        run_wpfleet(&tmp.path().join("nope.toml"), &["site", "list"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr={}", stderr);
}
