use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::{create_dir_all, write};
use std::path::Path;
use tempfile::{tempdir, NamedTempFile};

/// Creates a minimal config with a main target and one replica.
fn create_minimal_config() -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        b"targets:\n  - name: main\n    bucket: releases\n    prefix: ga\n  - name: mirror\n    bucket: releases-mirror\n    prefix: ga\nignore_patterns:\n  - \".*\\\\.txt$\"\nconcurrency: 4\nhash_workers: 2\n",
    )
    .expect("Writing temp config failed");
    config
}

fn write_file(root: &Path, relative: &str, body: &[u8]) {
    let path = root.join(relative);
    create_dir_all(path.parent().unwrap()).unwrap();
    write(path, body).unwrap();
}

#[test]
fn upload_maven_dry_run_succeeds_and_prints_report() {
    let config = create_minimal_config();
    let release = tempdir().unwrap();
    write_file(release.path(), "org/foo/bar/1.0/bar-1.0.jar", b"jar bytes");
    write_file(release.path(), "org/foo/bar/1.0/bar-1.0.pom", b"<project/>");
    write_file(release.path(), "org/foo/bar/1.0/notes.txt", b"ignored");

    let mut cmd = Command::cargo_bin("artifact-bucket").expect("Binary exists");
    cmd.arg("upload-maven")
        .arg("--config")
        .arg(config.path())
        .arg("--product")
        .arg("P1")
        .arg("--root")
        .arg(release.path())
        .arg("--dry-run")
        .env_remove("ARTIFACT_BUCKET_ENDPOINT")
        .env_remove("ARTIFACT_BUCKET_REGION");

    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains("upload-maven report")
                .and(predicate::str::contains("[ok] main: 2 synced"))
                .and(predicate::str::contains("[ok] mirror: 2 synced"))
                .and(predicate::str::contains("invalidate: /ga/org/foo/bar/maven-metadata.*")),
        );
}

#[test]
fn delete_maven_dry_run_on_empty_store_succeeds() {
    let config = create_minimal_config();
    let release = tempdir().unwrap();
    write_file(release.path(), "org/foo/bar/1.0/bar-1.0.jar", b"jar bytes");

    let mut cmd = Command::cargo_bin("artifact-bucket").expect("Binary exists");
    cmd.arg("delete-maven")
        .arg("--config")
        .arg(config.path())
        .arg("--product")
        .arg("P1")
        .arg("--root")
        .arg(release.path())
        .arg("--dry-run");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("delete-maven report"));
}

#[test]
fn upload_npm_dry_run_succeeds() {
    let config = create_minimal_config();
    let package = tempdir().unwrap();
    write_file(package.path(), "widget-1.0.0.tgz", b"tarball bytes");
    write_file(
        package.path(),
        "package.json",
        br#"{"name": "widget", "version": "1.0.0", "description": "A widget"}"#,
    );

    let mut cmd = Command::cargo_bin("artifact-bucket").expect("Binary exists");
    cmd.arg("upload-npm")
        .arg("--config")
        .arg(config.path())
        .arg("--product")
        .arg("P1")
        .arg("--tarball")
        .arg(package.path().join("widget-1.0.0.tgz"))
        .arg("--package-json")
        .arg(package.path().join("package.json"))
        .arg("--dry-run");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("invalidate: /ga/widget/package.*"));
}

#[test]
fn missing_config_file_fails() {
    let release = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("artifact-bucket").expect("Binary exists");
    cmd.arg("upload-maven")
        .arg("--config")
        .arg("does-not-exist.yaml")
        .arg("--product")
        .arg("P1")
        .arg("--root")
        .arg(release.path())
        .arg("--dry-run");

    cmd.assert().failure();
}

#[test]
fn missing_subcommand_arguments_fail() {
    let mut cmd = Command::cargo_bin("artifact-bucket").expect("Binary exists");
    cmd.arg("upload-npm").arg("--product").arg("P1");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--config"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*; // needed for .with()
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use artifact_bucket::cli::{run, Cli, Commands};

    // A missing config file makes run fail after the initial event.
    let cli = Cli {
        command: Commands::UploadMaven {
            config: std::path::PathBuf::from("dummy.yaml"),
            product: "P1".to_string(),
            root: std::path::PathBuf::from("."),
            dry_run: true,
        },
    };

    let result = run(cli).await;
    assert!(result.is_err());

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
