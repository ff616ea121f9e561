use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde::Serialize;
use tempfile::NamedTempFile;

use colfile::{ColumnFile, ColumnSet, Compression, FileOptions};

#[derive(Serialize, Clone)]
#[allow(non_snake_case)]
struct Row {
    Foo: i64,
    Bar: i64,
    Baz: i64,
}

fn sets(i: usize) -> Option<ColumnSet> {
    match i {
        0 => Some(ColumnSet::new(["Foo", "Bar", "Baz"])),
        _ => None,
    }
}

fn twenty_rows() -> Vec<Row> {
    (0..20)
        .map(|_| Row {
            Foo: 1,
            Bar: 2,
            Baz: 3,
        })
        .collect()
}

fn bench_append(c: &mut Criterion) {
    let rows = twenty_rows();

    c.bench_function("append_20_rows_zstd", |b| {
        let tmp = NamedTempFile::new().unwrap();
        let file = ColumnFile::open(tmp.path(), sets).unwrap();
        b.iter(|| file.append(black_box(&rows), &()).unwrap())
    });

    c.bench_function("append_20_rows_uncompressed", |b| {
        let tmp = NamedTempFile::new().unwrap();
        let file = ColumnFile::open_with(
            tmp.path(),
            sets,
            FileOptions {
                compression: Compression::None,
            },
        )
        .unwrap();
        b.iter(|| file.append(black_box(&rows), &()).unwrap())
    });
}

fn bench_iter(c: &mut Criterion) {
    let rows = twenty_rows();

    let tmp = NamedTempFile::new().unwrap();
    let file = ColumnFile::open(tmp.path(), sets).unwrap();
    for i in 0..256i64 {
        file.append(&rows, &i).unwrap();
    }

    c.bench_function("iter_one_column_256_batches", |b| {
        b.iter(|| {
            let mut batches = 0u64;
            file.iter(&["Foo"], |cols| {
                black_box(cols);
                batches += 1;
                true
            })
            .unwrap();
            batches
        })
    });

    c.bench_function("iter_metas_256_batches", |b| {
        b.iter(|| {
            let mut batches = 0u64;
            file.iter_metas(|meta: i64| {
                black_box(meta);
                batches += 1;
                true
            })
            .unwrap();
            batches
        })
    });
}

criterion_group!(benches, bench_append, bench_iter);
criterion_main!(benches);
