use predicates::prelude::*;

#[test]
fn quits_cleanly_on_q() {
    let staging = tempfile::tempdir().unwrap();
    assert_cmd::Command::cargo_bin("ripup")
        .unwrap()
        .args(["--output", staging.path().to_str().unwrap()])
        .write_stdin("q\n")
        .assert()
        .success();
}

#[test]
fn quits_cleanly_on_stdin_eof() {
    let staging = tempfile::tempdir().unwrap();
    assert_cmd::Command::cargo_bin("ripup")
        .unwrap()
        .args(["--output", staging.path().to_str().unwrap()])
        .write_stdin("")
        .assert()
        .success();
}

#[test]
fn summary_is_printed_on_request() {
    let staging = tempfile::tempdir().unwrap();
    assert_cmd::Command::cargo_bin("ripup")
        .unwrap()
        .args(["--summary", "--output", staging.path().to_str().unwrap()])
        .write_stdin("q\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("files found: 0"));
}

#[test]
fn empty_uploader_command_is_a_startup_error() {
    assert_cmd::Command::cargo_bin("ripup")
        .unwrap()
        .args(["--uploader", ""])
        .write_stdin("q\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("uploader command must not be empty"));
}

#[test]
fn zero_concurrency_is_a_startup_error() {
    assert_cmd::Command::cargo_bin("ripup")
        .unwrap()
        .args(["--copy-concurrency", "0"])
        .write_stdin("q\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("copy concurrency"));
}

#[test]
fn zero_queue_capacity_is_a_startup_error() {
    assert_cmd::Command::cargo_bin("ripup")
        .unwrap()
        .args(["--queue-capacity", "0"])
        .write_stdin("q\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("queue capacity"));
}
