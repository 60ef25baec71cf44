use predicates::prelude::*;

use super::common::{PACKAGE_COMMAND, TestEnv, host, other, read};

#[test]
fn build_covers_the_whole_matrix() {
  let env = TestEnv::new();

  env
    .yard_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains(host().triple()))
    .stdout(predicate::str::contains(other().triple()))
    .stdout(predicate::str::contains("Built 2 platform(s)"));

  assert_eq!(env.entries("packages").len(), 2);
  assert_eq!(env.entries("deps").len(), 2);
  assert_eq!(env.entries("toolchains").len(), 2);
}

#[test]
fn package_uses_the_toolchain_and_sees_its_platform() {
  let env = TestEnv::new();
  let (ok, json) = env.build_json(&[]);
  assert!(ok);

  for platform in json["platforms"].as_array().unwrap() {
    let path = std::path::PathBuf::from(platform["path"].as_str().unwrap());
    assert_eq!(read(&path.join("greeting.txt")).trim(), "hello from the toolchain");
    assert_eq!(read(&path.join("platform.txt")).trim(), platform["platform"].as_str().unwrap());
  }
}

#[test]
fn second_build_is_fully_cached() {
  let env = TestEnv::new();
  env.yard_cmd().arg("build").assert().success();

  let (ok, json) = env.build_json(&[]);

  assert!(ok);
  for platform in json["platforms"].as_array().unwrap() {
    assert_eq!(platform["cached"], true);
  }
  assert_eq!(env.entries("packages").len(), 2);
}

#[test]
fn one_failing_platform_does_not_stop_the_others() {
  let env = TestEnv::with_manifest(|m| {
    m["toolchain"]["commands"]["package"] = format!(
      "test \"$SHIPYARD_PLATFORM\" != \"{}\" || exit 7; {}",
      other().triple(),
      PACKAGE_COMMAND
    )
    .into();
  });

  env
    .yard_cmd()
    .arg("build")
    .assert()
    .failure()
    .stdout(predicate::str::contains("[package]"))
    .stdout(predicate::str::contains("exited with code 7"))
    .stderr(predicate::str::contains("1 of 2 platform(s) failed"));

  assert_eq!(env.entries("packages").len(), 1);
}

#[test]
fn failing_dependencies_are_reported_per_platform() {
  let env = TestEnv::with_manifest(|m| {
    m["toolchain"]["commands"]["dependencies"] = "echo broken >&2; exit 2".into();
  });

  let (ok, json) = env.build_json(&[]);

  assert!(!ok);
  for platform in json["platforms"].as_array().unwrap() {
    assert_eq!(platform["success"], false);
    assert_eq!(platform["stage"], "dependencies");
    assert!(platform["error"].as_str().unwrap().contains("broken"));
  }
}

#[test]
fn platform_flag_limits_the_build() {
  let env = TestEnv::new();

  let (ok, json) = env.build_json(&["--platform", &host().triple()]);

  assert!(ok);
  assert_eq!(json["platforms"].as_array().unwrap().len(), 1);
  assert_eq!(env.entries("packages").len(), 1);
}

#[test]
fn source_change_rebuilds_packages_but_not_dependencies() {
  let env = TestEnv::new();
  env.yard_cmd().arg("build").assert().success();

  env.write_file("src/main.rs", "fn main() { println!(\"changed\"); }\n");
  env.yard_cmd().arg("build").assert().success();

  assert_eq!(env.entries("deps").len(), 2);
  assert_eq!(env.entries("packages").len(), 4);
}

#[test]
fn ignored_files_do_not_trigger_rebuilds() {
  let env = TestEnv::new();
  env.write_file(".shipyardignore", "notes.txt\nscratch/\n");
  env.yard_cmd().arg("build").assert().success();

  env.write_file("notes.txt", "remember the milk");
  env.write_file("scratch/out.log", "noise");
  let (ok, json) = env.build_json(&[]);

  assert!(ok);
  for platform in json["platforms"].as_array().unwrap() {
    assert_eq!(platform["cached"], true);
  }
}

#[test]
fn integrity_change_rebuilds_dependencies() {
  let env = TestEnv::new();
  env.yard_cmd().arg("build").assert().success();

  env.edit_manifest(|m| m["dependencies"][0]["integrity"] = "sha256-333".into());
  env.yard_cmd().arg("build").assert().success();
  env.yard_cmd().arg("build").assert().success();

  assert_eq!(env.entries("deps").len(), 4);
}

#[test]
fn missing_required_library_fails_at_its_stage() {
  let env = TestEnv::with_manifest(|m| {
    m["nativeLibraries"] = serde_json::json!([{ "name": "shipyardtestlib", "searchPaths": ["libs"], "required": true }]);
  });

  env
    .yard_cmd()
    .arg("build")
    .assert()
    .failure()
    .stdout(predicate::str::contains("[native-libraries]"))
    .stdout(predicate::str::contains("shipyardtestlib"));
}

#[test]
fn jobs_flag_is_accepted() {
  let env = TestEnv::new();
  env.yard_cmd().args(["build", "--jobs", "1"]).assert().success();
}

#[test]
fn concurrent_builds_wait_and_share_the_store() {
  let env = TestEnv::new();

  let outputs: Vec<std::process::Output> = std::thread::scope(|s| {
    let runs: Vec<_> = (0..2)
      .map(|_| s.spawn(|| env.yard_cmd().arg("build").output().unwrap()))
      .collect();
    runs.into_iter().map(|run| run.join().unwrap()).collect()
  });

  for output in &outputs {
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
  }
  assert_eq!(env.entries("toolchains").len(), 2);
  assert_eq!(env.entries("packages").len(), 2);
}

#[test]
fn no_wait_fails_while_the_store_is_busy() {
  use shipyard_lib::store::Store;
  use shipyard_lib::store::lock::{LockMode, StoreLock};

  let env = TestEnv::new();
  let store = Store::open(env.store_path()).unwrap();
  let held = StoreLock::try_acquire(&store, LockMode::Exclusive, "gc").unwrap();

  env
    .yard_cmd()
    .args(["--no-wait", "build"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("store is locked by another process: gc"));
  assert!(env.entries("packages").is_empty());

  drop(held);
  env.yard_cmd().args(["--no-wait", "build"]).assert().success();
}
