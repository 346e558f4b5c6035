use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use actionweb::{controller::Context, ActionResult, App, Config, Controller, Request};

fn bump(ctx: &mut Context<'_>) -> ActionResult<()> {
    let n: u32 = ctx.var("n").and_then(|v| v.parse().ok()).unwrap_or(0);
    ctx.set_var("n", &(n + 1).to_string());
    Ok(())
}

fn app() -> App {
    let controller = Controller::new("Bench")
        .action("index", |_| Ok("index".to_string()))
        .action("hooked", |ctx| Ok(ctx.var("n").unwrap_or("0").to_string()))
        .action("show", |ctx| Ok(ctx.params().join("/")))
        .action("post_show", |_| Ok("posted".to_string()))
        .configure(|s| {
            s.charset("UTF-8")?;
            s.setup(&["hooked"], |s| {
                for _ in 0..8 {
                    s.before(bump)?;
                }
                Ok(())
            })
        })
        .unwrap_or_else(|e| panic!("{}", e));
    let mut app = App::new(Config::new());
    if let Err(e) = app.mount_bare(controller) {
        panic!("{}", e);
    }
    app
}

fn request_parse_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parse");

    let requests = [
        ("simple", b"GET / HTTP/1.1\r\nHost: localhost:7878\r\nUser-Agent: Test\r\n\r\n".as_slice()),
        (
            "query",
            b"GET /bench/show/1?id=123&name=test HTTP/1.1\r\nHost: localhost\r\nAccept-Encoding: gzip, deflate, br\r\n\r\n".as_slice(),
        ),
        (
            "form",
            b"POST /bench/show HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\na=1&b=two%20words".as_slice(),
        ),
    ];

    for (name, request) in requests.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.iter(|| {
                let buffer = black_box(request.to_vec());
                let _ = Request::try_from(&buffer, 0);
            });
        });
    }

    group.finish();
}

fn dispatch_benchmark(c: &mut Criterion) {
    let app = app();
    let mut group = c.benchmark_group("dispatch");

    let paths = [
        ("index", Request::get("/bench")),
        ("hooked", Request::get("/bench/hooked")),
        ("params", Request::get("/bench/show/a/b/c")),
        ("verb", Request::post("/bench/show")),
        ("not_found", Request::get("/bench/missing")),
    ];

    for (name, request) in paths.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.iter(|| {
                let _ = app.call(black_box(request), 0);
            });
        });
    }

    group.finish();
}

fn compressed_dispatch_benchmark(c: &mut Criterion) {
    let controller = Controller::new("Big").action("index", |_| Ok("<p>row</p>".repeat(2000)));
    let mut app = App::new(Config::new());
    if let Err(e) = app.mount_bare(controller) {
        panic!("{}", e);
    }

    let mut group = c.benchmark_group("dispatch_encoding");
    for encoding in ["identity", "gzip", "deflate"].iter() {
        let request = Request::get("/big").with_header("Accept-Encoding", encoding);
        group.bench_with_input(BenchmarkId::from_parameter(encoding), &request, |b, request| {
            b.iter(|| {
                let _ = app.call(black_box(request), 0).map(|r| r.as_bytes());
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    request_parse_benchmark,
    dispatch_benchmark,
    compressed_dispatch_benchmark
);
criterion_main!(benches);
