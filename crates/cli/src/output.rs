//! How yard reports to the terminal.
//!
//! Status lines start with a [`Mark`]. Failures and warnings go to stderr,
//! everything else to stdout. `--output json` bypasses all of this and
//! prints the command's summary struct instead.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use shipyard_lib::gc::GcResult;
use shipyard_lib::matrix::{MatrixReport, PlatformOutcome};
use shipyard_lib::platform::Platform;
use shipyard_lib::store::EntryKind;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
  /// Built or completed in this run.
  Done,
  /// Served from the store.
  Reused,
  Failed,
  Note,
  Warn,
}

impl Mark {
  fn glyph(self) -> &'static str {
    match self {
      Mark::Done => "✓",
      Mark::Reused => "=",
      Mark::Failed => "✗",
      Mark::Note => "•",
      Mark::Warn => "⚠",
    }
  }

  fn stream(self) -> Stream {
    match self {
      Mark::Failed | Mark::Warn => Stream::Stderr,
      _ => Stream::Stdout,
    }
  }

  fn paint(self, text: &str, stream: Stream) -> String {
    match self {
      Mark::Done | Mark::Reused => text.if_supports_color(stream, |s| s.green()).to_string(),
      Mark::Failed => text.if_supports_color(stream, |s| s.red()).to_string(),
      Mark::Note => text.if_supports_color(stream, |s| s.blue()).to_string(),
      Mark::Warn => text.if_supports_color(stream, |s| s.yellow()).to_string(),
    }
  }

  fn render(self, message: &str, stream: Stream) -> String {
    format!("{} {}", self.paint(self.glyph(), stream), message)
  }
}

/// A status line on the stream `mark` belongs to.
pub fn emit(mark: Mark, message: &str) {
  match mark.stream() {
    Stream::Stderr => eprintln!("{}", mark.render(message, Stream::Stderr)),
    _ => println!("{}", mark.render(message, Stream::Stdout)),
  }
}

/// An indented `label: value` line under a status line.
pub fn field(label: &str, value: &str) {
  let label = format!("{}:", label);
  println!(
    "  {} {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn emit_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// The first twelve characters of a hash, enough to tell entries apart.
pub fn short(hash: &str) -> &str {
  hash.get(..12).unwrap_or(hash)
}

pub fn human_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
  if bytes < 1024 {
    return format!("{} B", bytes);
  }

  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

/// Wall-clock time at millisecond precision, e.g. `1s 250ms`.
pub fn elapsed(duration: Duration) -> String {
  let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
  humantime::format_duration(Duration::from_millis(millis)).to_string()
}

/// One row of the build report. Stdout coloring applies.
pub fn platform_line(platform: Platform, outcome: &PlatformOutcome) -> String {
  let triple = format!("{:<16}", platform.triple());
  match outcome {
    PlatformOutcome::Built(package) => {
      let (mark, suffix) = if package.cache_hit {
        (Mark::Reused, " (cached)")
      } else {
        (Mark::Done, "")
      };
      mark.render(
        &format!(
          "{} {}{}",
          triple,
          package.path.display(),
          suffix.if_supports_color(Stream::Stdout, |s| s.dimmed())
        ),
        Stream::Stdout,
      )
    }
    PlatformOutcome::Failed(e) => {
      let stage = format!("[{}]", e.stage());
      Mark::Failed.render(
        &format!(
          "{} {} {}",
          triple,
          stage.if_supports_color(Stream::Stdout, |s| s.yellow()),
          e.diagnostic()
        ),
        Stream::Stdout,
      )
    }
  }
}

/// The closing line of a build: how many platforms made it and how long it took.
pub fn build_verdict(report: &MatrixReport, took: Duration) -> (Mark, String) {
  let total = report.outcomes.len();
  let built = report.packages().count();
  if report.is_success() {
    let reused = report.packages().filter(|p| p.cache_hit).count();
    let mut message = format!("Built {} platform(s) in {}", total, elapsed(took));
    if reused > 0 {
      message.push_str(&format!(" ({} from cache)", reused));
    }
    (Mark::Done, message)
  } else {
    (Mark::Warn, format!("{} of {} platform(s) failed", total - built, total))
  }
}

/// Label/value rows for a gc summary.
pub fn gc_fields(result: &GcResult) -> Vec<(String, String)> {
  let mut rows: Vec<(String, String)> = EntryKind::ALL
    .iter()
    .map(|kind| {
      let stats = result.stats.kind(*kind);
      (
        format!("{} removed", kind.dir_name()),
        format!("{} of {}", stats.deleted, stats.scanned),
      )
    })
    .collect();
  if result.stats.staging_removed > 0 {
    rows.push((
      "Leftovers removed".to_string(),
      result.stats.staging_removed.to_string(),
    ));
  }
  rows.push(("Roots".to_string(), result.roots.to_string()));
  rows.push((
    "Space freed".to_string(),
    human_bytes(result.stats.total_bytes_freed()),
  ));
  rows
}
