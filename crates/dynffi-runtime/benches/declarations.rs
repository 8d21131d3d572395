//! Declaration parsing and layout benchmarks
//!
//! Measures:
//! - Batch `cdef` parsing of prototype-heavy and record-heavy text
//! - Type expression lookup through the interning registry
//! - Field offset queries

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dynffi_runtime::Ffi;

const PROTOTYPES: &str = r#"
    size_t strlen(const char *s);
    int strcmp(const char *a, const char *b);
    void *memcpy(void *dst, const void *src, size_t n);
    void *memset(void *s, int c, size_t n);
    int snprintf(char *buf, size_t n, const char *fmt, ...);
    long strtol(const char *s, char **end, int base);
    double strtod(const char *s, char **end);
    int open(const char *path, int flags, ...);
    ssize_t read(int fd, void *buf, size_t n);
    ssize_t write(int fd, const void *buf, size_t n);
"#;

const RECORDS: &str = r#"
    struct timespec_like { time_t sec; long nsec; };
    struct header { uint32_t magic; uint16_t version; uint16_t flags; uint64_t length; };
    struct entry {
        int kind;
        union { int i; double d; struct { short lo; short hi; }; };
        char name[32];
        struct header hdr;
    };
    typedef struct entry entry_t;
"#;

/// Records with `n` members each, as one batch
fn wide_records(count: usize, members: usize) -> String {
    let mut out = String::new();
    for r in 0..count {
        out.push_str(&format!("struct r{} {{", r));
        for m in 0..members {
            let ty = ["char", "int", "double", "void *"][m % 4];
            out.push_str(&format!(" {} m{};", ty, m));
        }
        out.push_str(" };\n");
    }
    out
}

fn bench_cdef_prototypes(c: &mut Criterion) {
    c.bench_function("cdef_prototypes_10", |b| {
        b.iter(|| {
            let ffi = Ffi::new();
            ffi.cdef(black_box(PROTOTYPES)).ok();
        });
    });
}

fn bench_cdef_records(c: &mut Criterion) {
    c.bench_function("cdef_nested_records", |b| {
        b.iter(|| {
            let ffi = Ffi::new();
            ffi.cdef(black_box(RECORDS)).ok();
        });
    });
}

fn bench_cdef_wide_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("cdef_wide_records");
    for members in [4, 16, 64] {
        let source = wide_records(8, members);
        group.bench_with_input(BenchmarkId::from_parameter(members), &source, |b, src| {
            b.iter(|| {
                let ffi = Ffi::new();
                ffi.cdef(black_box(src)).ok();
            });
        });
    }
    group.finish();
}

fn bench_type_lookup(c: &mut Criterion) {
    let ffi = Ffi::new();
    ffi.cdef(RECORDS).ok();
    c.bench_function("type_of_interned", |b| {
        b.iter(|| ffi.type_of(black_box("const entry_t *[4]")).ok());
    });
}

fn bench_offset_of(c: &mut Criterion) {
    let ffi = Ffi::new();
    ffi.cdef(RECORDS).ok();
    c.bench_function("offset_of_anonymous_member", |b| {
        b.iter(|| ffi.offset_of(black_box("struct entry"), black_box("hi")).ok());
    });
}

criterion_group!(
    declaration_benches,
    bench_cdef_prototypes,
    bench_cdef_records,
    bench_cdef_wide_records,
    bench_type_lookup,
    bench_offset_of
);

criterion_main!(declaration_benches);
