use predicates::prelude::*;

use super::common::{TestEnv, host};

#[test]
fn print_renders_an_activation_script() {
  let env = TestEnv::with_manifest(|m| m["shell"] = serde_json::json!({ "env": { "GREETING": "hi there" } }));

  env
    .yard_cmd()
    .args(["shell", "--print", "--shell", "bash"])
    .assert()
    .success()
    .stdout(predicate::str::contains("export SHIPYARD_SHELL='1'"))
    .stdout(predicate::str::contains(format!("export SHIPYARD_PLATFORM='{}'", host().triple())))
    .stdout(predicate::str::contains("export GREETING='hi there'"))
    .stdout(predicate::str::contains("export PATH="));
}

#[test]
fn fish_script_uses_set() {
  let env = TestEnv::new();

  env
    .yard_cmd()
    .args(["shell", "--print", "--shell", "fish"])
    .assert()
    .success()
    .stdout(predicate::str::contains("set -gx SHIPYARD_SHELL '1'"));
}

#[test]
fn unknown_shell_is_an_error() {
  let env = TestEnv::new();

  env
    .yard_cmd()
    .args(["shell", "--print", "--shell", "tcsh"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unsupported shell"));
}

#[test]
fn command_runs_with_the_toolchain_on_path() {
  let env = TestEnv::new();

  env
    .yard_cmd()
    .args(["shell", "--", "greet"])
    .assert()
    .success()
    .stdout(predicate::str::contains("hello from the toolchain"));
}

#[test]
fn command_exit_code_is_propagated() {
  let env = TestEnv::new();

  env
    .yard_cmd()
    .args(["shell", "--", "sh", "-c", "exit 3"])
    .assert()
    .code(3);
}

#[test]
fn shell_toolchain_is_the_build_toolchain() {
  let env = TestEnv::new();
  env.yard_cmd().arg("build").assert().success();
  let toolchains = env.entries("toolchains");

  let output = env.yard_cmd().args(["shell", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

  // No new toolchain entry was materialized for the shell.
  assert_eq!(env.entries("toolchains"), toolchains);
  assert!(toolchains.contains(&json["toolchain"].as_str().unwrap().to_string()));
}

#[test]
fn shell_fingerprint_matches_the_build_metadata() {
  let env = TestEnv::new();

  let shell = env.yard_cmd().args(["shell", "-o", "json"]).output().unwrap();
  let fingerprint = env.yard_cmd().args(["fingerprint", "-o", "json"]).output().unwrap();

  let shell: serde_json::Value = serde_json::from_slice(&shell.stdout).unwrap();
  let fingerprint: serde_json::Value = serde_json::from_slice(&fingerprint.stdout).unwrap();
  assert_eq!(shell["dependencyFingerprint"], fingerprint["fingerprint"]);
}

#[test]
fn missing_tool_fails() {
  let env = TestEnv::with_manifest(|m| m["shell"] = serde_json::json!({ "tools": ["no-such-tool-anywhere"] }));

  env
    .yard_cmd()
    .args(["shell", "--print"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("no-such-tool-anywhere"));
}

#[test]
fn missing_library_fails_in_the_shell_even_when_optional() {
  let env = TestEnv::with_manifest(|m| {
    m["nativeLibraries"] = serde_json::json!([{ "name": "shipyardtestlib", "searchPaths": ["libs"] }]);
  });

  env
    .yard_cmd()
    .args(["shell", "--print"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("native library 'shipyardtestlib' not found"));

  // The build treats it as optional.
  env.yard_cmd().arg("build").assert().success();
}

#[test]
fn library_dirs_are_exported_for_the_loader() {
  let env = TestEnv::with_manifest(|m| {
    m["nativeLibraries"] = serde_json::json!([{ "name": "shipyardtestlib", "searchPaths": ["libs"] }]);
  });
  let file = host().os.library_file_names("shipyardtestlib").remove(0);
  env.write_file(&format!("libs/{}", file), "");

  let var = host().os.library_path_var();
  env
    .yard_cmd()
    .args(["shell", "--print", "--shell", "sh"])
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("export {}=", var)))
    .stdout(predicate::str::contains("/libs"));
}

#[test]
fn first_use_shells_race_to_one_toolchain() {
  let env = TestEnv::new();
  for i in 0..200 {
    env.write_file(&format!("toolchain/share/doc-{}.txt", i), "toolchain docs\n");
  }
  assert!(env.entries("toolchains").is_empty());

  let outputs: Vec<std::process::Output> = std::thread::scope(|s| {
    let runs: Vec<_> = (0..2)
      .map(|_| s.spawn(|| env.yard_cmd().args(["shell", "--print", "--shell", "bash"]).output().unwrap()))
      .collect();
    runs.into_iter().map(|run| run.join().unwrap()).collect()
  });

  for output in &outputs {
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
  }
  assert_eq!(outputs[0].stdout, outputs[1].stdout);

  let toolchains = env.entries("toolchains");
  assert_eq!(toolchains.len(), 1);
  let share = env.store_path().join("toolchains").join(&toolchains[0]).join("share");
  assert_eq!(std::fs::read_dir(share).unwrap().count(), 200);
}
