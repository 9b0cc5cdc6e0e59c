//! Lock validator acquire/release benchmarks
//!
//! Measures the per-operation cost of the validator on the host:
//! - cached path: a nesting whose chains are already proven
//! - uncached path: every nesting is new and runs the full graph checks
//!
//! Performance Targets:
//! - Cached acquire + release: ≤ 1 µs per lock
//! - Uncached acquire + release: ≤ 20 µs per lock
//!
//! NOTE: Run with `cargo bench -- --ignored --nocapture` to see the numbers.

#![cfg(test)]

use std::time::{Duration, Instant};

use mellos_lockdep::{ClassId, LockClassKey, Lockdep, LockdepConfig, ReadMode, TaskLockState, HOST_PLATFORM};

const NR_KEYS: usize = 64;
const ITERATIONS: usize = 100_000;

const TARGET_CACHED_NS: u128 = 1_000;
const TARGET_UNCACHED_NS: u128 = 20_000;

const KEY: LockClassKey = LockClassKey::new();
static KEYS: [LockClassKey; NR_KEYS] = [KEY; NR_KEYS];

/// Benchmark result structure
#[derive(Debug)]
struct BenchmarkResult {
    name: String,
    duration: Duration,
    operations: usize,
    ns_per_op: u128,
    target_ns: u128,
    passed: bool,
}

impl BenchmarkResult {
    fn new(name: &str, duration: Duration, operations: usize, target_ns: u128) -> Self {
        let ns_per_op = duration.as_nanos() / operations.max(1) as u128;
        Self {
            name: name.to_string(),
            duration,
            operations,
            ns_per_op,
            target_ns,
            passed: ns_per_op <= target_ns,
        }
    }

    fn print(&self) {
        let status = if self.passed { "✓ PASS" } else { "✗ FAIL" };
        println!("{} {}", status, self.name);
        println!("  Duration: {:?}", self.duration);
        println!("  Operations: {}", self.operations);
        println!(
            "  Latency: {} ns/op (target: ≤ {} ns/op)",
            self.ns_per_op, self.target_ns
        );
        println!();
    }
}

fn lockdep() -> Lockdep {
    let mut config = LockdepConfig::new();
    config.max_lock_classes = 128;
    config.max_list_entries = 16_384;
    config.max_lock_chains = 16_384;
    config.max_chain_hlocks = 65_536;
    config.max_stack_trace_entries = 16_384;
    config.check_chain_key = false;
    Lockdep::new(&HOST_PLATFORM, config)
}

fn classes(ld: &Lockdep) -> Vec<ClassId> {
    KEYS.iter()
        .map(|key| ld.register_or_lookup_class(key, "bench", 0).unwrap())
        .collect()
}

/// Acquire and release `a` then `b`
fn nest(ld: &Lockdep, task: &TaskLockState, a: ClassId, b: ClassId) {
    ld.acquire_class(task, a, 0x10, false, ReadMode::Write, true, 0x100);
    ld.acquire_class(task, b, 0x20, false, ReadMode::Write, true, 0x200);
    ld.release_instance(task, 0x20, true, 0x300);
    ld.release_instance(task, 0x10, true, 0x400);
}

fn bench_cached() -> BenchmarkResult {
    let ld = lockdep();
    let ids = classes(&ld);
    let task = TaskLockState::new(1, "bench");
    nest(&ld, &task, ids[0], ids[1]);

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        nest(&ld, &task, ids[0], ids[1]);
    }
    let duration = start.elapsed();
    assert!(ld.is_enabled());

    BenchmarkResult::new("cached acquire/release", duration, ITERATIONS * 2, TARGET_CACHED_NS)
}

fn bench_uncached() -> BenchmarkResult {
    let ld = lockdep();
    let ids = classes(&ld);
    let task = TaskLockState::new(1, "bench");

    // Every ascending pair once: a new chain and a new dependency each time
    let mut pairs = 0;
    let start = Instant::now();
    for i in 0..NR_KEYS {
        for j in i + 1..NR_KEYS {
            nest(&ld, &task, ids[i], ids[j]);
            pairs += 1;
        }
    }
    let duration = start.elapsed();
    assert!(ld.is_enabled());

    BenchmarkResult::new("uncached acquire/release", duration, pairs * 2, TARGET_UNCACHED_NS)
}

#[test]
#[ignore]
fn bench_lockdep_cached_path() {
    println!("\n=== Lock Validator: Cached Path ===\n");
    let result = bench_cached();
    result.print();
}

#[test]
#[ignore]
fn bench_lockdep_uncached_path() {
    println!("\n=== Lock Validator: Uncached Path ===\n");
    let result = bench_uncached();
    result.print();
}

#[test]
#[ignore]
fn bench_lockdep_summary() {
    println!("\n=== Lock Validator Benchmark Summary ===\n");
    let results = [bench_cached(), bench_uncached()];
    for result in &results {
        result.print();
    }
    let passed = results.iter().filter(|r| r.passed).count();
    println!("Passed: {}/{}", passed, results.len());
}
