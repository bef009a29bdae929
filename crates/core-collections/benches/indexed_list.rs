use core_collections::IndexedList;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn bench_push_hit_erase(c: &mut Criterion) {
    c.bench_function("push_back_4096", |b| {
        b.iter(|| {
            let mut list: IndexedList<u32, u32> = IndexedList::new();
            for k in 0..4096u32 {
                list.push_back(black_box(k), k);
            }
            list
        })
    });

    c.bench_function("hit_hot", |b| {
        let mut list: IndexedList<u32, u32> = IndexedList::new();
        for k in 0..4096u32 {
            list.push_back(k, k);
        }
        b.iter(|| {
            let mut hits = 0usize;
            for k in 0..4096u32 {
                if list.hit(black_box(&k)) {
                    hits += 1;
                }
            }
            hits
        })
    });

    c.bench_function("erase_reinsert", |b| {
        let mut list: IndexedList<u32, u32> = IndexedList::new();
        for k in 0..4096u32 {
            list.push_back(k, k);
        }
        b.iter(|| {
            for k in 0..1024u32 {
                list.erase(black_box(&k));
            }
            for k in 0..1024u32 {
                list.push_back(k, k);
            }
        })
    });
}

criterion_group!(benches, bench_push_hit_erase);
criterion_main!(benches);
