use super::common::{TestEnv, host, other};

fn fingerprint(env: &TestEnv) -> serde_json::Value {
  let output = env.yard_cmd().args(["fingerprint", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn reports_fingerprint_and_keys_per_platform() {
  let env = TestEnv::new();

  let json = fingerprint(&env);

  assert_eq!(json["fingerprint"].as_str().unwrap().len(), 64);
  assert_eq!(json["dependencyCount"], 2);
  let host_key = &json["platforms"][host().triple()]["dependencies"];
  let other_key = &json["platforms"][other().triple()]["dependencies"];
  assert!(host_key.is_string());
  assert_ne!(host_key, other_key);
}

#[test]
fn dependency_order_does_not_matter() {
  let env = TestEnv::new();
  let before = fingerprint(&env);

  env.edit_manifest(|m| {
    let deps = m["dependencies"].as_array_mut().unwrap();
    deps.reverse();
  });

  assert_eq!(fingerprint(&env)["fingerprint"], before["fingerprint"]);
}

#[test]
fn integrity_changes_the_fingerprint() {
  let env = TestEnv::new();
  let before = fingerprint(&env);

  env.edit_manifest(|m| m["dependencies"][1]["integrity"] = "sha256-999".into());

  assert_ne!(fingerprint(&env)["fingerprint"], before["fingerprint"]);
}

#[test]
fn source_edits_do_not_change_dependency_keys() {
  let env = TestEnv::new();
  let before = fingerprint(&env);

  env.write_file("src/lib.rs", "pub fn added() {}\n");

  assert_eq!(fingerprint(&env)["platforms"], before["platforms"]);
}

#[test]
fn fingerprint_builds_nothing() {
  let env = TestEnv::new();
  fingerprint(&env);

  assert!(env.entries("toolchains").is_empty());
  assert!(env.entries("deps").is_empty());
  assert!(env.entries("packages").is_empty());
}

#[test]
fn keys_match_what_the_build_uses() {
  let env = TestEnv::new();
  let json = fingerprint(&env);

  env.yard_cmd().arg("build").assert().success();

  let deps = env.entries("deps");
  for platform in [host(), other()] {
    let key = json["platforms"][platform.triple()]["dependencies"].as_str().unwrap();
    assert!(deps.contains(&key.to_string()), "{} missing from {:?}", key, deps);
  }
}
