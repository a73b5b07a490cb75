use assert_cmd::cargo::cargo_bin_cmd;

mod common;

use common::{parse_json, vendor_tarball, write_tarball, ROOT};

#[test]
fn inspect_lists_packages_as_json() {
    let (_temp, tarball) = vendor_tarball();
    let assert = cargo_bin_cmd!("tarvenv")
        .args(["--json", "inspect"])
        .arg(&tarball)
        .assert()
        .success();
    let payload = parse_json(&assert.get_output().stdout);

    let mut keys = payload
        .as_object()
        .expect("object")
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    keys.sort();
    assert_eq!(keys, vec!["details", "message", "status"]);
    assert_eq!(payload["status"], "ok");

    let details = &payload["details"];
    assert_eq!(details["compression"], "gzip");
    assert_eq!(details["release"]["version"], "6.0.2");
    let mut names = details["inventory"]["candidates"]
        .as_array()
        .expect("candidates")
        .iter()
        .filter_map(|candidate| candidate["name"].as_str())
        .collect::<Vec<_>>();
    names.sort_unstable();
    assert_eq!(names, vec!["duo-client", "six", "twisted"]);
    assert_eq!(
        details["inventory"]["ignored"][0]["reason"],
        "prefix",
        "bundled interpreter sources are not a package"
    );
}

#[test]
fn inspect_prints_a_summary() {
    let (_temp, tarball) = vendor_tarball();
    let assert = cargo_bin_cmd!("tarvenv")
        .arg("inspect")
        .arg(&tarball)
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout");
    assert!(
        stdout.starts_with("authproxy 6.0.2 (0f1e2d3): 3 packages (1 prebuilt wheels, 2 source trees)"),
        "unexpected summary: {stdout}"
    );
    assert!(stdout.contains("six-1.16.0-py2.py3-none-any.whl"));
}

#[test]
fn skip_and_alias_flags_shape_the_inventory() {
    let (_temp, tarball) = vendor_tarball();
    let assert = cargo_bin_cmd!("tarvenv")
        .args(["--json", "inspect", "--skip", "Twisted", "--alias", "six=six-renamed"])
        .arg(&tarball)
        .assert()
        .success();
    let payload = parse_json(&assert.get_output().stdout);
    let candidates = payload["details"]["inventory"]["candidates"]
        .as_array()
        .expect("candidates")
        .clone();
    assert!(candidates.iter().all(|candidate| candidate["name"] != "twisted"));
    assert!(candidates.iter().any(|candidate| candidate["name"] == "six-renamed"));
}

#[test]
fn quiet_flag_suppresses_human_output() {
    let (_temp, tarball) = vendor_tarball();
    let assert = cargo_bin_cmd!("tarvenv")
        .args(["-q", "inspect"])
        .arg(&tarball)
        .assert()
        .success();
    assert!(assert.get_output().stdout.is_empty());
}

#[test]
fn archive_with_two_roots_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tarball = temp.path().join("broken.tgz");
    write_tarball(
        &tarball,
        &[("first/", ""), ("first/a.txt", "a"), ("second/", ""), ("second/b.txt", "b")],
    );
    let assert = cargo_bin_cmd!("tarvenv")
        .arg("inspect")
        .arg(&tarball)
        .assert()
        .code(1);
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).expect("stderr");
    assert!(stderr.contains("error:"), "expected an error line: {stderr}");
    assert!(stderr.contains("first"), "roots should be named: {stderr}");
}

#[test]
fn empty_archive_is_a_user_error_in_json_too() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tarball = temp.path().join("empty.tgz");
    write_tarball(&tarball, &[]);
    let assert = cargo_bin_cmd!("tarvenv")
        .args(["--json", "inspect"])
        .arg(&tarball)
        .assert()
        .code(1);
    let payload = parse_json(&assert.get_output().stdout);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["reason"], "archive");
}

#[test]
fn missing_archive_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    cargo_bin_cmd!("tarvenv")
        .arg("inspect")
        .arg(temp.path().join(format!("{ROOT}.tgz")))
        .assert()
        .code(1);
}
