//! Benchmarks for node matching, group composition and ruleset synthesis.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use subrule::group::{compose, ProxyGroupSpec};
use subrule::ruleset::convert_ruleset;
use subrule::synth::{build_inline_rules, build_providers, ProviderOptions};
use subrule::{rule_matches, Node, RulesetContent, RulesetType};

const REGIONS: &[&str] = &["HK", "JP", "US", "SG", "TW"];

/// Generate nodes spread across regions and sources.
fn generate_nodes(count: usize) -> Vec<Node> {
    (0..count)
        .map(|i| {
            let region = REGIONS[i % REGIONS.len()];
            Node::new(
                format!("{} {:03}", region, i),
                if i % 2 == 0 { "ss" } else { "vmess" },
                format!("{}.example.com", region.to_lowercase()),
                (443 + i % 100) as u16,
            )
            .with_source(format!("sub{}", i % 3), (i % 3) as i32)
        })
        .collect()
}

/// Generate a Surge ruleset body.
fn generate_ruleset(lines: usize) -> String {
    let mut body = String::with_capacity(lines * 32);
    for i in 0..lines {
        match i % 4 {
            0 => body.push_str(&format!("DOMAIN-SUFFIX,suffix{}.com\n", i)),
            1 => body.push_str(&format!("DOMAIN,host{}.example.com\n", i)),
            2 => body.push_str(&format!("IP-CIDR,10.{}.0.0/16,no-resolve\n", i % 250)),
            _ => body.push_str(&format!("DOMAIN-KEYWORD,kw{}\n", i)),
        }
    }
    body
}

fn contents(lines: usize) -> Vec<RulesetContent> {
    vec![RulesetContent {
        group: "Proxy".to_string(),
        path: "https://rules.example.com/bench.list".to_string(),
        path_typed: "https://rules.example.com/bench.list".to_string(),
        rule_type: RulesetType::Surge,
        content: generate_ruleset(lines),
        update_interval: 86400,
    }]
}

/// Benchmark single-rule matching over a node set.
fn bench_rule_matches(c: &mut Criterion) {
    let nodes = generate_nodes(1_000);
    let rules = [
        "HK",
        "(HK|JP) \\d+",
        "!!GROUPID=0,2!!TYPE=SS",
        "!!GROUP=sub1!!PORT=450-500",
        "!!INSERT=!0",
    ];

    let mut group = c.benchmark_group("rule_matches");
    group.throughput(Throughput::Elements(nodes.len() as u64));

    for rule in rules.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(rule), rule, |b, rule| {
            b.iter(|| {
                for node in &nodes {
                    black_box(rule_matches(rule, node));
                }
            })
        });
    }

    group.finish();
}

/// Benchmark group composition with different node counts.
fn bench_compose(c: &mut Criterion) {
    let specs = ProxyGroupSpec::parse_lines(&[
        "Proxy`select`[]Auto`[]DIRECT`.*",
        "Auto`url-test`.*`http://www.gstatic.com/generate_204`300,,50",
        "HK`fallback`HK`http://www.gstatic.com/generate_204`300",
        "Media`select`!!GROUPID=1`(JP|US)",
    ]);

    let mut group = c.benchmark_group("compose");
    for size in [100, 1_000, 5_000].iter() {
        let nodes = generate_nodes(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("nodes", size), size, |b, _| {
            b.iter(|| black_box(compose(&specs, &nodes, &[], false)))
        });
    }
    group.finish();
}

/// Benchmark ruleset normalization and synthesis.
fn bench_synthesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthesis");

    for size in [1_000, 10_000].iter() {
        let items = contents(*size);
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("convert", size), size, |b, _| {
            b.iter(|| black_box(convert_ruleset(&items[0].content, RulesetType::Surge)))
        });
        group.bench_with_input(BenchmarkId::new("inline", size), size, |b, _| {
            b.iter(|| black_box(build_inline_rules(&items, 0)))
        });
        group.bench_with_input(BenchmarkId::new("providers", size), size, |b, _| {
            b.iter(|| black_box(build_providers(&items, &ProviderOptions::default())))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rule_matches, bench_compose, bench_synthesis);
criterion_main!(benches);
