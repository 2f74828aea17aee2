//! 配置数据结构定义
//!
//! 定义配置变量、配置源声明、读取请求/结果以及发布快照

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 配置项映射（键有序，比较时与插入顺序无关）
pub type Settings = BTreeMap<String, String>;

/// 单个配置变量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVar {
    /// 变量名（即环境变量名）
    pub name: String,
    /// 变量值
    pub value: VarValue,
}

/// 配置变量的值：静态字符串或动态引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarValue {
    /// 静态值
    Static(String),
    /// 由配置源在运行时解析的动态值
    Dynamic(DynamicValue),
}

/// 动态值引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicValue {
    /// 配置源类型
    pub from: String,
    /// 传给配置源的请求参数
    #[serde(default)]
    pub config: Settings,
}

impl ConfigVar {
    /// 创建静态变量
    pub fn static_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: VarValue::Static(value.into()),
        }
    }

    /// 创建动态变量
    ///
    /// # 参数
    /// * `name` - 变量名
    /// * `from` - 配置源类型
    /// * `config` - 请求参数
    pub fn dynamic<I, K, V>(name: impl Into<String>, from: impl Into<String>, config: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            value: VarValue::Dynamic(DynamicValue {
                from: from.into(),
                config: config
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            }),
        }
    }

    /// 是否为动态变量
    pub fn is_dynamic(&self) -> bool {
        matches!(self.value, VarValue::Dynamic(_))
    }
}

/// 某一配置源类型的声明设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSource {
    /// 配置源类型
    #[serde(rename = "type")]
    pub source_type: String,
    /// 配置源设置
    #[serde(default)]
    pub config: Settings,
    /// 调用方提供的变更指纹
    pub hash: u64,
}

impl ConfigSource {
    /// 创建配置源声明，指纹由类型和设置计算得出
    pub fn new(source_type: impl Into<String>, config: Settings) -> Self {
        let source_type = source_type.into();
        let hash = Self::fingerprint(&source_type, &config);
        Self {
            source_type,
            config,
            hash,
        }
    }

    /// 使用调用方自有的指纹创建配置源声明
    pub fn with_hash(source_type: impl Into<String>, config: Settings, hash: u64) -> Self {
        Self {
            source_type: source_type.into(),
            config,
            hash,
        }
    }

    /// 计算稳定的设置指纹
    ///
    /// 对类型与按键排序的设置做 SHA-256，取前 8 字节（大端）。
    pub fn fingerprint(source_type: &str, config: &Settings) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(source_type.as_bytes());
        hasher.update([0u8]);
        for (key, value) in config {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

/// 发往配置源 `read` 的单个请求
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigRequest {
    /// 变量名
    pub name: String,
    /// 请求参数
    #[serde(default)]
    pub config: Settings,
}

/// 配置源返回的单个结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValue {
    /// 变量名
    pub name: String,
    /// 解析结果
    pub result: ValueResult,
}

/// 单个变量的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueResult {
    /// 解析成功
    Value(String),
    /// 解析失败，附带错误信息
    Error(String),
}

impl ConfigValue {
    /// 成功结果
    pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: ValueResult::Value(value.into()),
        }
    }

    /// 失败结果
    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: ValueResult::Error(message.into()),
        }
    }
}

/// 已发布的配置快照
///
/// 内容为按字典序排列的 `NAME=VALUE` 列表，发布后不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    generation: u64,
    vars: Arc<[String]>,
    published_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// 尚未发布任何内容时的初始快照（代数为 0）
    pub fn initial() -> Self {
        Self {
            generation: 0,
            vars: Arc::from(Vec::new()),
            published_at: None,
        }
    }

    pub(crate) fn new(generation: u64, vars: Vec<String>) -> Self {
        Self {
            generation,
            vars: Arc::from(vars),
            published_at: Some(Utc::now()),
        }
    }

    /// 快照代数
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 有序的 `NAME=VALUE` 列表
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    /// 发布时间
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    /// 是否为初始快照
    pub fn is_initial(&self) -> bool {
        self.generation == 0
    }

    /// 以 `(名称, 值)` 的形式遍历，按第一个 `=` 切分
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|entry| entry.split_once('=').unwrap_or((entry.as_str(), "")))
    }

    /// 转换为环境变量映射
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        self.pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::initial()
    }
}
