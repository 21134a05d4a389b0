use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pagesnap::{
    format_bytes, format_duration, name_for, text_overlay, tile_pattern_svg, validate_url, Config,
    OutputFormat, TextWatermark, WatermarkPosition,
};
use std::time::Duration;

fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

const USER_CONFIG: &str = r##"{
    "output": {
        "location": "./out",
        "formats": ["png", "jpg", "pdf", "png"],
        "storage": { "provider": "in-memory", "maxItems": 64 }
    },
    "performance": { "maxConcurrency": 8 },
    "sanitization": { "customRules": [".ad-banner", "#cookie-wall", "[data-popup]"] },
    "watermark": {
        "enabled": true,
        "type": "text",
        "text": { "content": "CONFIDENTIAL", "position": "tile" }
    }
}"##;

fn benchmark_config(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");
    configure_fast_group(&mut group);

    group.bench_function("parse_and_merge", |b| {
        b.iter(|| {
            let config = Config::from_json_str(black_box(USER_CONFIG));
            black_box(config)
        });
    });

    group.finish();
}

fn benchmark_naming(c: &mut Criterion) {
    let mut group = c.benchmark_group("naming");
    configure_fast_group(&mut group);

    let urls = [
        "https://example.com",
        "https://example.com/blog/2024/03/some-long-article-title?ref=feed",
        "http://localhost:8080/a/b/c/",
        "https://sub.domain.example.org/path_with_underscores/and-dashes",
    ];

    group.bench_function("name_for", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(name_for(black_box(url), OutputFormat::Png).ok());
            }
        });
    });

    group.bench_function("validate_url", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(validate_url(black_box(url)).is_ok());
            }
        });
    });

    group.finish();
}

fn benchmark_page_payloads(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_payloads");
    configure_fast_group(&mut group);

    let text = TextWatermark {
        content: "DRAFT <internal> & confidential".to_string(),
        ..Default::default()
    };
    group.bench_function("tile_pattern_svg", |b| {
        b.iter(|| black_box(tile_pattern_svg(black_box(&text))));
    });

    let tiled = TextWatermark {
        position: WatermarkPosition::Tile,
        ..text.clone()
    };
    group.bench_function("tiled_text_overlay", |b| {
        b.iter(|| black_box(text_overlay(black_box(&tiled))));
    });

    group.finish();
}

fn benchmark_format_utilities(c: &mut Criterion) {
    let mut group = c.benchmark_group("utils");
    configure_fast_group(&mut group);

    group.bench_function("format_duration", |b| {
        b.iter(|| black_box(format_duration(black_box(Duration::from_millis(93_512)))));
    });

    group.bench_function("format_bytes", |b| {
        b.iter(|| black_box(format_bytes(black_box(52_428_800))));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_config,
    benchmark_naming,
    benchmark_page_payloads,
    benchmark_format_utilities
);
criterion_main!(benches);
