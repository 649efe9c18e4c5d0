//! `/tmp/perf-<pid>.map` emission (spec.md §4.12/§6), grounded on
//! `original_source/src/profiling/perf_map_writer.cpp`. Feature-gated
//! behind `perf-map` — a profiling convenience, not core compiler
//! behavior, so it stays out of the default build.

use crate::executor::Executor;
use std::fs::OpenOptions;
use std::io::{self, Write};

/// Append one `<hex addr> <hex len> <name>` line describing `exec`'s code
/// region to the current process's perf map, so `perf report` can resolve
/// JIT'd frames by name.
pub fn add_perf_map_region(exec: &Executor, name: &str) -> io::Result<()> {
    let path = format!("/tmp/perf-{}.map", std::process::id());
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let (addr, len) = exec.code_region();
    writeln!(file, "{:x} {:x} {name}", addr as usize, len)
}
