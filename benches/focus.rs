use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mycodb::adapters::sql_dump::parse_sql_dump;
use mycodb::{IngestRules, MycoConfig, MycoDb};
use std::fmt::Write;
use std::hint::black_box;

const ARTISTS: i64 = 200;
const ALBUMS_PER_ARTIST: i64 = 5;

fn music_dump() -> String {
    let mut dump = String::from(
        "CREATE TABLE Artist (ArtistId INTEGER, Name TEXT);\n\
         CREATE TABLE Album (AlbumId INTEGER, Title TEXT, ArtistId INTEGER);\n",
    );
    for a in 1..=ARTISTS {
        writeln!(dump, "INSERT INTO Artist VALUES ({}, 'Artist {}');", a, a).unwrap();
        for n in 0..ALBUMS_PER_ARTIST {
            let id = a * ALBUMS_PER_ARTIST + n;
            writeln!(dump, "INSERT INTO Album VALUES ({}, 'Album {}', {});", id, id, a).unwrap();
        }
    }
    dump
}

fn ingested() -> MycoDb {
    let config = MycoConfig::new(96, 96).with_seed(11).with_agents(128).with_steps(3000);
    let mut db = MycoDb::with_config(config).expect("valid config");
    let dataset = parse_sql_dump(&music_dump()).expect("dump parses");
    db.ingest_dataset(&dataset, IngestRules::default(), None);
    db
}

fn bench_focused_vs_global(c: &mut Criterion) {
    let mut db = ingested();
    let mut group = c.benchmark_group("query/albums_of_artist");

    db.unfocus();
    group.bench_function("global", |b| {
        b.iter(|| {
            let rs = db.sql(black_box("SELECT * FROM Album WHERE ArtistId = 42")).expect("query");
            black_box(rs);
        });
    });

    db.goto(42, Some("Artist")).expect("artist placed");
    for radius in [2.0f32, 4.0, 8.0] {
        db.set_radius(radius);
        group.bench_with_input(BenchmarkId::new("focused", radius), &radius, |b, _| {
            b.iter(|| {
                let rs = db.sql(black_box("SELECT * FROM Album WHERE ArtistId = 42")).expect("query");
                black_box(rs);
            });
        });
    }
    group.finish();
}

fn bench_fk_lookup(c: &mut Criterion) {
    let mut db = ingested();
    let value = mycodb::Value::Integer(42);
    c.bench_function("query/fk_local", |b| {
        b.iter(|| {
            let rs = db.query_by_column("Album", "ArtistId", black_box(&value), 2.0, None).expect("lookup");
            black_box(rs.len());
        });
    });
}

criterion_group!(benches, bench_focused_vs_global, bench_fk_lookup);
criterion_main!(benches);
