//! 变更检测模块
//!
//! 将变量拆分为静态值与按配置源分组的动态请求，并计算两次输入之间的差异

use crate::sync::types::{ConfigRequest, ConfigSource, ConfigVar, VarValue};
use std::collections::BTreeMap;

/// 按配置源类型分组的动态请求
pub type DynamicGroups = BTreeMap<String, Vec<ConfigRequest>>;

/// 规范化后的变量集合（同名变量后写入者生效）
pub type NormalizedVars = BTreeMap<String, VarValue>;

/// 动态请求分组的变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicChange {
    /// 新增的配置源类型
    Added,
    /// 不再被任何变量引用的配置源类型
    Removed,
    /// 请求集合发生变化
    Modified,
}

/// 配置源声明的变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChange {
    /// 新出现或指纹变化
    Changed,
    /// 声明被移除
    Removed,
}

/// 规范化变量列表
///
/// 按名称去重，同名时保留最后一次出现的值。
pub fn normalize_vars(vars: &[ConfigVar]) -> NormalizedVars {
    vars.iter()
        .map(|var| (var.name.clone(), var.value.clone()))
        .collect()
}

/// 拆分规范化后的变量
///
/// # 返回
/// * `(BTreeMap<String, String>, DynamicGroups)` - 静态值与按配置源分组的动态请求
pub fn split_vars(vars: &NormalizedVars) -> (BTreeMap<String, String>, DynamicGroups) {
    let mut static_vars = BTreeMap::new();
    let mut dynamic: DynamicGroups = BTreeMap::new();

    for (name, value) in vars {
        match value {
            VarValue::Static(value) => {
                static_vars.insert(name.clone(), value.clone());
            }
            VarValue::Dynamic(dynamic_value) => {
                dynamic
                    .entry(dynamic_value.from.clone())
                    .or_default()
                    .push(ConfigRequest {
                        name: name.clone(),
                        config: dynamic_value.config.clone(),
                    });
            }
        }
    }

    (static_vars, dynamic)
}

/// 比较两组请求是否相同（与顺序无关）
pub fn requests_equal(a: &[ConfigRequest], b: &[ConfigRequest]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut a: Vec<&ConfigRequest> = a.iter().collect();
    let mut b: Vec<&ConfigRequest> = b.iter().collect();
    a.sort();
    b.sort();
    a == b
}

/// 计算动态请求分组的差异
///
/// 只返回发生变化的配置源类型：新出现的为 `Added`，消失的为 `Removed`，
/// 请求集合不同的为 `Modified`。请求内部参数按键比较，与顺序无关。
pub fn diff_dynamic(old: &DynamicGroups, new: &DynamicGroups) -> BTreeMap<String, DynamicChange> {
    let mut changes = BTreeMap::new();

    for (source_type, new_requests) in new {
        match old.get(source_type) {
            Some(old_requests) => {
                if !requests_equal(old_requests, new_requests) {
                    changes.insert(source_type.clone(), DynamicChange::Modified);
                }
            }
            None => {
                changes.insert(source_type.clone(), DynamicChange::Added);
            }
        }
    }

    for source_type in old.keys() {
        if !new.contains_key(source_type) {
            changes.insert(source_type.clone(), DynamicChange::Removed);
        }
    }

    changes
}

/// 将配置源列表转换为按类型索引的映射（同类型后写入者生效）
pub fn index_sources(sources: &[ConfigSource]) -> BTreeMap<String, ConfigSource> {
    sources
        .iter()
        .map(|source| (source.source_type.clone(), source.clone()))
        .collect()
}

/// 按指纹计算配置源声明的差异
pub fn diff_sources(
    old: &BTreeMap<String, ConfigSource>,
    new: &BTreeMap<String, ConfigSource>,
) -> BTreeMap<String, SourceChange> {
    let mut changes = BTreeMap::new();

    for (source_type, source) in new {
        let changed = old
            .get(source_type)
            .is_none_or(|previous| previous.hash != source.hash);
        if changed {
            changes.insert(source_type.clone(), SourceChange::Changed);
        }
    }

    for source_type in old.keys() {
        if !new.contains_key(source_type) {
            changes.insert(source_type.clone(), SourceChange::Removed);
        }
    }

    changes
}
