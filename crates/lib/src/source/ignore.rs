//! Ignore rules for the source filter.
//!
//! Supported syntax, one rule per line:
//!
//! - `name`, `*.log`, `result-*`: glob matched against every path component
//! - `dir/`: as above, directories only
//! - `docs/build`, `/vendor`: anchored to the root, matched component-wise
//! - `#` starts a comment line; negation (`!rule`) is rejected

use std::fmt;
use std::path::Path;

use crate::consts::IGNORE_FILENAME;

/// Version-control metadata, prior build outputs and editor droppings.
pub const BUILTIN_RULES: &[&str] = &[
  ".git",
  ".hg",
  ".svn",
  ".jj",
  "_darcs",
  "target/",
  "result",
  "result-*",
  ".direnv/",
  ".shipyard/",
  ".idea/",
  ".vscode/",
  "*.swp",
  "*.swo",
  "*~",
  ".#*",
  "#*#",
  ".DS_Store",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
  raw: String,
  components: Vec<String>,
  anchored: bool,
  dir_only: bool,
}

impl IgnoreRule {
  pub fn parse(raw: &str) -> Result<Self, String> {
    let rule = raw.trim();
    if rule.is_empty() {
      return Err("empty ignore rule".to_string());
    }
    if rule.starts_with('!') {
      return Err(format!("negated ignore rule '{}' is not supported", rule));
    }

    let dir_only = rule.ends_with('/');
    let body = rule.trim_end_matches('/');
    let anchored = body.contains('/');
    let components: Vec<String> = body
      .trim_start_matches('/')
      .split('/')
      .filter(|c| !c.is_empty())
      .map(str::to_string)
      .collect();

    if components.is_empty() {
      return Err(format!("ignore rule '{}' matches nothing", rule));
    }

    Ok(Self {
      raw: rule.to_string(),
      components,
      anchored,
      dir_only,
    })
  }

  /// Whether the rule matches `rel_path` (components separated by `/`).
  pub fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
    if self.dir_only && !is_dir {
      return false;
    }

    if self.anchored {
      let parts: Vec<&str> = rel_path.split('/').collect();
      return parts.len() == self.components.len()
        && self.components.iter().zip(&parts).all(|(pat, part)| glob_match(pat, part));
    }

    rel_path
      .rsplit('/')
      .next()
      .is_some_and(|name| glob_match(&self.components[0], name))
  }
}

impl fmt::Display for IgnoreRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.raw)
  }
}

/// An ordered rule set.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
  rules: Vec<IgnoreRule>,
}

impl IgnoreRules {
  /// Built-in exclusions only.
  pub fn builtin() -> Self {
    let rules = BUILTIN_RULES
      .iter()
      .filter_map(|r| IgnoreRule::parse(r).ok())
      .collect();
    Self { rules }
  }

  /// Built-ins, then `project_rules`, then `.shipyardignore` under `root`.
  pub fn for_project(root: &Path, project_rules: &[String]) -> Result<Self, String> {
    let mut rules = Self::builtin();
    for rule in project_rules {
      rules.push(rule)?;
    }

    let ignore_file = root.join(IGNORE_FILENAME);
    if ignore_file.is_file() {
      let content =
        std::fs::read_to_string(&ignore_file).map_err(|e| format!("failed to read {}: {}", ignore_file.display(), e))?;
      for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
          continue;
        }
        rules.push(line)?;
      }
    }

    Ok(rules)
  }

  pub fn push(&mut self, raw: &str) -> Result<(), String> {
    self.rules.push(IgnoreRule::parse(raw)?);
    Ok(())
  }

  pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
    self.rules.iter().any(|rule| rule.matches(rel_path, is_dir))
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }
}

/// Match a single path component against a glob with `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
  let p: Vec<char> = pattern.chars().collect();
  let t: Vec<char> = text.chars().collect();

  let (mut pi, mut ti) = (0, 0);
  let mut star: Option<(usize, usize)> = None;

  while ti < t.len() {
    if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
      pi += 1;
      ti += 1;
    } else if pi < p.len() && p[pi] == '*' {
      star = Some((pi, ti));
      pi += 1;
    } else if let Some((star_pi, star_ti)) = star {
      pi = star_pi + 1;
      ti = star_ti + 1;
      star = Some((star_pi, star_ti + 1));
    } else {
      return false;
    }
  }

  p[pi..].iter().all(|c| *c == '*')
}
