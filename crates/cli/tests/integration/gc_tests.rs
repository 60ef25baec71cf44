use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn gc_keeps_what_the_last_build_used() {
  let env = TestEnv::new();
  env.yard_cmd().arg("build").assert().success();

  env
    .yard_cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));

  assert_eq!(env.entries("packages").len(), 2);
  assert_eq!(env.entries("deps").len(), 2);
  assert_eq!(env.entries("toolchains").len(), 2);
}

#[test]
fn gc_removes_superseded_packages() {
  let env = TestEnv::new();
  env.yard_cmd().arg("build").assert().success();
  env.write_file("src/main.rs", "fn main() { println!(\"v2\"); }\n");
  env.yard_cmd().arg("build").assert().success();
  assert_eq!(env.entries("packages").len(), 4);

  env.yard_cmd().arg("gc").assert().success();

  assert_eq!(env.entries("packages").len(), 2);
  assert_eq!(env.entries("deps").len(), 2);
}

#[test]
fn gc_without_roots_empties_the_store() {
  let env = TestEnv::new();
  env.yard_cmd().arg("build").assert().success();
  std::fs::remove_dir_all(env.store_path().join("roots")).unwrap();

  env.yard_cmd().arg("gc").assert().success();

  assert!(env.entries("packages").is_empty());
  assert!(env.entries("toolchains").is_empty());
}

#[test]
fn gc_dry_run_shows_what_would_be_removed() {
  let env = TestEnv::new();
  env.yard_cmd().arg("build").assert().success();
  std::fs::remove_dir_all(env.store_path().join("roots")).unwrap();

  env
    .yard_cmd()
    .args(["gc", "--dry-run"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));

  assert_eq!(env.entries("packages").len(), 2);
}

#[test]
fn gc_json_output_is_valid() {
  let env = TestEnv::new();

  let output = env.yard_cmd().args(["gc", "-o", "json"]).output().unwrap();

  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert!(json["stats"]["packages"]["deleted"].is_number());
  assert!(json["deletedPaths"].is_array());
}
