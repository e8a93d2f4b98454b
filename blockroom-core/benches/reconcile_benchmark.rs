use blockroom_core::reconcile::apply;
use blockroom_core::{normalize, Block, BlockId, CursorTracker, CursorUpdate, Operation, Register, Room};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

fn document(blocks: usize) -> Vec<Block> {
    (0..blocks)
        .map(|i| Block::new(format!("b{i}"), "The quick brown fox jumps over the lazy dog."))
        .collect()
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("Reconcile");
    group.throughput(Throughput::Elements(1));

    let base = document(1_000);

    group.bench_function("change_middle_block", |b| {
        let reg = Register::updated([Block::new("b500", "edited")]);
        let anchor = BlockId::new("b500");
        b.iter(|| {
            let mut blocks = base.clone();
            let report = apply(&mut blocks, black_box(&reg), Some(&anchor));
            black_box(report);
        })
    });

    group.bench_function("enter_middle_block", |b| {
        let reg = Register::updated([Block::new("b500", "The quick")])
            .with_created([Block::new("new", " brown fox")]);
        let anchor = BlockId::new("b500");
        b.iter(|| {
            let mut blocks = base.clone();
            let report = apply(&mut blocks, black_box(&reg), Some(&anchor));
            black_box(report);
        })
    });

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("Cursors");

    let mut room = Room::new("bench");
    room.blocks = document(1_000);
    let mut tracker = CursorTracker::seeded(0);
    for i in 0..20 {
        tracker.upsert(&mut room, CursorUpdate::at(format!("b{}", i * 50), 10), &format!("user-{i}"));
    }

    group.bench_function("normalize_20_cursors", |b| {
        b.iter(|| {
            let mut r = room.clone();
            black_box(normalize(&mut r));
        })
    });

    group.bench_function("apply_edit_backspace", |b| {
        b.iter(|| {
            let mut r = room.clone();
            let op = Operation::Backspace {
                cursor: CursorUpdate::at("b99", 44),
                target: Block::new("b100", ""),
                merged: Block::new("b99", "merged"),
            };
            black_box(r.apply_edit(op.into_edit(), "user-0", &mut tracker));
        })
    });

    group.finish();
}

criterion_group!(benches, bench_reconcile, bench_normalize);
criterion_main!(benches);
