//! CLI integration tests. Compile commands run through `/bin/sh`.

#![cfg(unix)]

mod build_tests;
mod common;
mod fingerprint_tests;
mod gc_tests;
mod shell_tests;
