// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for message intake.
//!
//! These cover the synchronous hot paths that run for every inbound message:
//! - Priority queue insertion
//! - Channel aggregation
//! - Branch naming
//!
//! Run with: `cargo bench --bench queue`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::{Duration, Instant};

use arbiter::queue::{MessageAggregator, MessageQueue, Priority};
use arbiter::transport::ChatMessage;
use arbiter::workspace::{slugify, BranchNamer};

const PRIORITIES: [Priority; 4] = [Priority::Low, Priority::Normal, Priority::High, Priority::Urgent];

/// Benchmark filling a queue with mixed priorities.
fn bench_queue_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_insertion");

    for size in [10usize, 100, 1000] {
        let messages: Vec<ChatMessage> = (0..size)
            .map(|i| ChatMessage::new("general", "alice", format!("message {i}")))
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("mixed", size), &messages, |b, messages| {
            b.iter(|| {
                let queue = MessageQueue::new(size, Duration::ZERO);
                for (i, message) in messages.iter().enumerate() {
                    let _ = queue.enqueue(message.clone(), PRIORITIES[i % PRIORITIES.len()]);
                }
                black_box(queue.len())
            });
        });
    }

    // At capacity every insert evicts the oldest low-priority item.
    group.bench_function("evicting_low", |b| {
        let queue = MessageQueue::new(100, Duration::ZERO);
        for i in 0..100 {
            let _ = queue.enqueue(ChatMessage::new("general", "bob", format!("low {i}")), Priority::Low);
        }
        b.iter(|| {
            let _ = queue.enqueue(
                black_box(ChatMessage::new("general", "bob", "filler")),
                Priority::Low,
            );
        });
    });

    group.finish();
}

/// Benchmark buffering and draining across channels.
fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");
    let messages: Vec<ChatMessage> = (0..200)
        .map(|i| ChatMessage::new(format!("channel-{}", i % 20), "carol", format!("part {i}")))
        .collect();

    group.throughput(Throughput::Elements(messages.len() as u64));
    group.bench_function("push_and_drain_20_channels", |b| {
        b.iter(|| {
            let mut aggregator = MessageAggregator::new(Duration::ZERO);
            let now = Instant::now();
            for message in &messages {
                aggregator.push(message.clone(), now);
            }
            let batches = aggregator.drain_expired(now);
            black_box(batches.iter().filter_map(|b| b.combined()).count())
        });
    });

    group.finish();
}

/// Benchmark branch name derivation.
fn bench_branch_naming(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_naming");
    let namer = BranchNamer::new("arbiter/");

    let descriptions = [
        ("short", "fix the bug in auth"),
        ("punctuated", "  Add OAuth2 Login!! (and refresh tokens) / v2  "),
        (
            "long",
            "refactor the session driver so checkpoints are taken at tool boundaries and follow-up messages are folded into a continuation prompt",
        ),
    ];

    for (name, description) in descriptions {
        group.bench_with_input(BenchmarkId::new("slugify", name), description, |b, d| {
            b.iter(|| slugify(black_box(d)));
        });
        group.bench_with_input(BenchmarkId::new("branch_for", name), description, |b, d| {
            b.iter(|| namer.branch_for(black_box(d)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_queue_insertion, bench_aggregation, bench_branch_naming);
criterion_main!(benches);
