use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tack::diag::ErrorSink;
use tack::driver;
use tack::ir::{System, TypeMap};

const SMALL_MODEL: &str = r#"
clock c;
chan a;
process P() {
    state s0 { c <= 5 }, s1;
    init s0;
    trans s0 -> s1 { guard c >= 1; sync a!; assign c := 0; };
}
P1 := P();
system P1;
"#;

const MEDIUM_MODEL: &str = r#"
const int N = 4;
int[0,N] buffer;
clock c1, c2;
broadcast chan tick;
urgent chan grab;

int next(int v) {
    if (v == N) { return 0; }
    return v + 1;
}

process Producer(int[0,N] &slot) {
    clock w;
    state idle { w <= 10 }, busy { w <= 2 };
    init idle;
    trans idle -> busy { guard w >= 1; sync tick!; assign w := 0; },
          busy -> idle { assign slot := next(slot), w := 0; };
}

process Consumer(int[0,N] &slot) {
    state wait, take;
    init wait;
    trans wait -> take { guard slot > 0; sync tick?; },
          take -> wait { assign slot := 0; };
}

Prod := Producer(buffer);
Cons := Consumer(buffer);
system Prod, Cons;
"#;

const QUERIES: &str = "A[] buffer <= N\nE<> buffer == 0\nbuffer > 0 --> buffer == 0\n";

fn run_check(source: &str) -> bool {
    let mut system = System::new();
    let mut types = TypeMap::new();
    let mut sink = ErrorSink::new();
    driver::parse_xta_str(source, &mut system, &mut types, &mut sink, true)
}

fn bench_lex(c: &mut Criterion) {
    c.bench_function("lex_medium", |b| {
        b.iter(|| tack::lexer::lex(black_box(MEDIUM_MODEL)))
    });
}

fn bench_check(c: &mut Criterion) {
    c.bench_function("check_small", |b| b.iter(|| run_check(black_box(SMALL_MODEL))));
    c.bench_function("check_medium", |b| {
        b.iter(|| run_check(black_box(MEDIUM_MODEL)))
    });
}

fn bench_queries(c: &mut Criterion) {
    c.bench_function("check_medium_with_queries", |b| {
        b.iter(|| {
            let mut system = System::new();
            let mut types = TypeMap::new();
            let mut sink = ErrorSink::new();
            driver::parse_xta_str(
                black_box(MEDIUM_MODEL),
                &mut system,
                &mut types,
                &mut sink,
                true,
            );
            driver::check_queries_str(black_box(QUERIES), &mut system, &mut types, &mut sink)
        })
    });
}

criterion_group!(benches, bench_lex, bench_check, bench_queries);
criterion_main!(benches);
