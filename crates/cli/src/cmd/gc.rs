use std::time::Instant;

use anyhow::{Context, Result};

use shipyard_lib::gc::collect_garbage;
use shipyard_lib::store::lock::LockMode;

use super::GlobalArgs;
use crate::output::{Mark, elapsed, emit, emit_json, field, gc_fields};

pub fn cmd_gc(args: &GlobalArgs, dry_run: bool) -> Result<()> {
  let start = Instant::now();
  let store = args.open_store()?;

  let _lock = args.lock_store(&store, LockMode::Exclusive, "gc")?;

  let result = collect_garbage(&store, dry_run).context("Garbage collection failed")?;

  if args.output.is_json() {
    emit_json(&result)?;
  } else {
    if dry_run {
      emit(Mark::Note, "Dry run - no changes made");
    } else {
      emit(Mark::Done, "Garbage collection complete");
    }
    for (label, value) in gc_fields(&result) {
      field(&label, &value);
    }
    field("Duration", &elapsed(start.elapsed()));
  }

  Ok(())
}
