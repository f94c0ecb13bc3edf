//! Binary smoke tests.

use assert_cmd::Command;

#[test]
fn history_lists_nothing_for_new_user() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut cmd = Command::cargo_bin("straylight").expect("binary built");
    cmd.current_dir(dir.path())
        .env("STRAYLIGHT_DB_PATH", dir.path().join("history.db"))
        .args(["history", "--user", "nobody"])
        .assert()
        .success()
        .stdout(predicates::str::contains("No briefs recorded"));
}

#[test]
fn help_names_both_subcommands() {
    let mut cmd = Command::cargo_bin("straylight").expect("binary built");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("brief"))
        .stdout(predicates::str::contains("history"));
}
