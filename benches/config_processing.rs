//! 配置处理基准测试
//!
//! 测试变量规范化、差异计算、配置构建和设置解析的性能

use config_sync::config::SyncConfig;
use config_sync::sourcer::{ConfigSourcer, MemorySourcer};
use config_sync::sync::diff::{diff_dynamic, normalize_vars, split_vars};
use config_sync::sync::{registry_from, BuildInput, ConfigBuilder, ConfigSource, ConfigVar};
use criterion::{criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use std::hint::black_box;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 生成一组混合的静态与动态变量
fn create_test_vars(count: usize) -> Vec<ConfigVar> {
    (0..count)
        .map(|i| {
            if i % 3 == 0 {
                ConfigVar::dynamic(
                    format!("SECRET_{i}"),
                    if i % 2 == 0 { "vault" } else { "cloud" },
                    [("key", format!("app/secret_{i}"))],
                )
            } else {
                ConfigVar::static_value(format!("VAR_{i}"), format!("value-{i}"))
            }
        })
        .collect()
}

/// 配置处理基准测试
fn config_processing_benchmark(c: &mut Criterion) {
    let vars = create_test_vars(300);

    c.bench_function("normalize_and_split", |b| {
        b.iter(|| {
            let normalized = normalize_vars(black_box(&vars));
            black_box(split_vars(&normalized))
        });
    });

    c.bench_function("diff_dynamic", |b| {
        let (_, old) = split_vars(&normalize_vars(&vars));
        let mut changed = vars.clone();
        changed.truncate(200);
        let (_, new) = split_vars(&normalize_vars(&changed));

        b.iter(|| black_box(diff_dynamic(black_box(&old), black_box(&new))));
    });

    c.bench_function("settings_deserialization", |b| {
        let toml_str = r#"
[watcher]
refresh_interval_ms = 15000
coalesce_delay_ms = 500
force_delay_ms = 5000
dynamic_enabled = true

[logging]
level = "info"
json = true
"#;

        b.iter(|| {
            let config: SyncConfig = toml::from_str(black_box(toml_str)).unwrap();
            black_box(config)
        });
    });
}

/// 配置构建基准测试
fn config_build_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let vars = create_test_vars(300);

    let mut sourcers: Vec<(String, Arc<dyn ConfigSourcer>)> = Vec::new();
    for source_type in ["vault", "cloud"] {
        let values = (0..300).map(|i| (format!("app/secret_{i}"), format!("s3cr3t-{i}")));
        let sourcer = MemorySourcer::new(source_type).with_values(values);
        sourcers.push((source_type.to_string(), Arc::new(sourcer)));
    }
    let mut builder = ConfigBuilder::new(registry_from(sourcers));

    let (static_vars, dynamic) = split_vars(&normalize_vars(&vars));
    let sources: BTreeMap<String, ConfigSource> = BTreeMap::new();
    let dirty = BTreeMap::new();
    let token = CancellationToken::new();

    c.bench_function("config_build", |b| {
        b.iter(|| {
            let input = BuildInput {
                static_vars: &static_vars,
                dynamic: &dynamic,
                sources: &sources,
                dirty: &dirty,
            };
            let result = runtime.block_on(builder.build(&token, input));
            black_box(result)
        });
    });
}

criterion_group!(benches, config_processing_benchmark, config_build_benchmark);
criterion_main!(benches);
