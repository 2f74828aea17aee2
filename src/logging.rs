//! 日志系统模块
//!
//! 提供结构化日志配置和管理功能

use crate::config::types::LoggingSettings;
use log::LevelFilter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing::Dispatch;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter, Layer};

/// 全局日志初始化状态
#[derive(Debug, Default)]
struct GlobalLoggingState {
    /// 是否已初始化
    initialized: bool,
    /// 初始化失败信息
    init_error: Option<String>,
    /// 当前配置
    current_config: Option<LogConfig>,
}

/// 全局日志状态管理器
static GLOBAL_LOGGING_STATE: OnceLock<Mutex<GlobalLoggingState>> = OnceLock::new();

/// 日志配置结构
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 日志文件路径（可选）
    pub file_path: Option<PathBuf>,
    /// 是否输出到控制台
    pub console: bool,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块级别日志控制
    pub module_levels: HashMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }
}

impl LogConfig {
    /// 从配置文件中的日志设置构建
    ///
    /// # 参数
    /// * `settings` - 日志设置
    ///
    /// # 返回
    /// * `anyhow::Result<LogConfig>` - 日志配置，级别无法识别时返回错误
    pub fn from_settings(settings: &LoggingSettings) -> anyhow::Result<Self> {
        let level = parse_level(&settings.level)?;

        let mut module_levels = HashMap::new();
        for (module, level) in &settings.modules {
            module_levels.insert(module.clone(), parse_level(level)?);
        }

        Ok(Self {
            level,
            file_path: settings.file.clone(),
            console: settings.console,
            json_format: settings.json,
            module_levels,
        })
    }
}

fn parse_level(level: &str) -> anyhow::Result<LevelFilter> {
    level
        .parse::<LevelFilter>()
        .map_err(|e| anyhow::anyhow!("无效的日志级别 {}: {}", level, e))
}

/// 日志系统管理器
#[derive(Debug)]
pub struct LoggingSystem {
    /// 配置
    config: LogConfig,
}

impl LoggingSystem {
    /// 创建新的日志系统
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    /// 本实例持有的配置
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// 初始化日志系统
    ///
    /// # 参数
    /// * `config` - 日志配置
    ///
    /// # 返回
    /// * `Result<LoggingSystem, anyhow::Error>` - 初始化结果
    ///
    /// 全局 subscriber 只会安装一次，重复调用直接返回新的实例
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        Self::setup_logging_with_options(config, false)
    }

    /// 初始化日志系统（带选项）
    ///
    /// # 参数
    /// * `config` - 日志配置
    /// * `force_reinit` - 是否强制重新初始化（主要用于测试）
    ///
    /// # 返回
    /// * `Result<LoggingSystem, anyhow::Error>` - 初始化结果
    pub fn setup_logging_with_options(
        config: LogConfig,
        force_reinit: bool,
    ) -> anyhow::Result<Self> {
        {
            let state = lock_state();
            if state.initialized && !force_reinit {
                if let Some(e) = &state.init_error {
                    return Err(anyhow::anyhow!("日志系统之前初始化失败: {}", e));
                }
                return Ok(Self::new(config));
            }
        }

        let init_result = Self::perform_initialization(&config);

        {
            let mut state = lock_state();
            state.initialized = true;
            state.current_config = Some(config.clone());
            state.init_error = init_result.as_ref().err().map(|e| e.to_string());
        }

        init_result?;
        Ok(Self::new(config))
    }

    /// 执行实际的日志系统初始化
    fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
        // 初始化 LogTracer（log crate 到 tracing 的桥接）
        Self::init_log_tracer()?;

        let dispatch = Self::build_dispatch(config)?;
        match tracing::dispatcher::set_global_default(dispatch) {
            Ok(()) => {
                tracing::info!("日志系统初始化完成");
                tracing::debug!("日志配置: {:?}", config);
            }
            Err(_) => {
                // 进程内已有全局 subscriber
                tracing::debug!("日志系统已经初始化过了");
            }
        }

        Ok(())
    }

    /// 初始化 LogTracer
    fn init_log_tracer() -> anyhow::Result<()> {
        use tracing_log::LogTracer;

        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        let result = LOG_TRACER_INIT.get_or_init(|| LogTracer::init().map_err(|e| e.to_string()));

        result
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    /// 按配置构建独立的 subscriber，不安装为全局默认
    ///
    /// 返回值可以直接交给 `WatcherOptions::with_logger`，让单个监听器
    /// 使用自己的日志输出。
    ///
    /// # 参数
    /// * `config` - 日志配置
    ///
    /// # 返回
    /// * `anyhow::Result<Dispatch>` - 构建好的分发器
    pub fn build_dispatch(config: &LogConfig) -> anyhow::Result<Dispatch> {
        let env_filter = Self::build_env_filter(config)?;

        let console_layer = config
            .console
            .then(|| format_layer(config.json_format, true, std::io::stdout));

        let file_layer = match &config.file_path {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| anyhow::anyhow!("创建日志文件失败: {}", e))?;
                Some(format_layer(config.json_format, false, Mutex::new(file)))
            }
            None => None,
        };

        let subscriber = registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer);

        Ok(Dispatch::new(subscriber))
    }

    /// 构建环境过滤器，模块级别覆盖全局级别
    fn build_env_filter(config: &LogConfig) -> anyhow::Result<EnvFilter> {
        let mut env_filter = EnvFilter::from_default_env()
            .add_directive(Self::convert_level_to_directive(config.level));

        for (module, level) in &config.module_levels {
            let directive = format!("{}={}", module, Self::level_to_string(*level))
                .parse::<Directive>()
                .map_err(|e| anyhow::anyhow!("模块 {} 的日志指令无效: {}", module, e))?;
            env_filter = env_filter.add_directive(directive);
        }

        Ok(env_filter)
    }

    /// 将 log::LevelFilter 转换为 tracing 的指令
    fn convert_level_to_directive(level: LevelFilter) -> Directive {
        use tracing_subscriber::filter::LevelFilter as TracingLevel;
        let level = match level {
            LevelFilter::Off => TracingLevel::OFF,
            LevelFilter::Error => TracingLevel::ERROR,
            LevelFilter::Warn => TracingLevel::WARN,
            LevelFilter::Info => TracingLevel::INFO,
            LevelFilter::Debug => TracingLevel::DEBUG,
            LevelFilter::Trace => TracingLevel::TRACE,
        };
        Directive::from(level)
    }

    /// 将 log::LevelFilter 转换为字符串
    fn level_to_string(level: LevelFilter) -> &'static str {
        match level {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        }
    }

    /// 检查日志系统是否已初始化
    pub fn is_initialized() -> bool {
        GLOBAL_LOGGING_STATE
            .get()
            .map(|state| {
                state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .initialized
            })
            .unwrap_or(false)
    }

    /// 获取当前日志配置（如果已初始化）
    pub fn current_config() -> Option<LogConfig> {
        GLOBAL_LOGGING_STATE.get().and_then(|state| {
            state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .current_config
                .clone()
        })
    }

    /// 重置日志系统状态（主要用于测试）
    #[cfg(test)]
    pub fn reset_for_testing() {
        *lock_state() = GlobalLoggingState::default();
    }
}

fn lock_state() -> MutexGuard<'static, GlobalLoggingState> {
    GLOBAL_LOGGING_STATE
        .get_or_init(|| Mutex::new(GlobalLoggingState::default()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 创建格式化层（纯文本或JSON）
fn format_layer<S, W>(json: bool, ansi: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer()
            .json()
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .with_writer(writer)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .with_writer(writer)
            .with_ansi(ansi)
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    /// 创建测试用的日志配置
    fn create_test_config() -> LogConfig {
        LogConfig {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }

    #[test]
    #[serial]
    fn test_logging_system_single_initialization() {
        LoggingSystem::reset_for_testing();

        let config = create_test_config();

        let first = LoggingSystem::setup_logging(config.clone());
        assert!(first.is_ok());
        assert!(LoggingSystem::is_initialized());

        // 第二次调用不会重复安装
        let second = LoggingSystem::setup_logging(config);
        assert!(second.is_ok());
    }

    #[test]
    #[serial]
    fn test_logging_system_force_reinit() {
        LoggingSystem::reset_for_testing();

        let config = create_test_config();
        LoggingSystem::setup_logging(config.clone()).unwrap();

        let result = LoggingSystem::setup_logging_with_options(config, true);
        assert!(result.is_ok());
    }

    #[test]
    #[serial]
    fn test_current_config_retrieval() {
        LoggingSystem::reset_for_testing();
        assert!(LoggingSystem::current_config().is_none());

        let mut config = create_test_config();
        config.json_format = true;
        let system = LoggingSystem::setup_logging(config.clone()).unwrap();
        assert_eq!(system.config(), &config);

        let current = LoggingSystem::current_config().unwrap();
        assert_eq!(current.level, config.level);
        assert!(current.json_format);
    }

    #[test]
    fn test_build_dispatch_with_file_output() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut config = create_test_config();
        config.file_path = Some(temp_file.path().to_path_buf());
        config.console = false;

        let dispatch = LoggingSystem::build_dispatch(&config).unwrap();
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!("写入文件的日志");
        });

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(content.contains("写入文件的日志"));
    }

    #[test]
    fn test_build_dispatch_with_module_levels() {
        let mut config = create_test_config();
        config
            .module_levels
            .insert("config_sync::sync".to_string(), LevelFilter::Debug);
        config
            .module_levels
            .insert("config_sync::sourcer".to_string(), LevelFilter::Warn);

        assert!(LoggingSystem::build_dispatch(&config).is_ok());
    }

    #[test]
    fn test_from_settings() {
        let mut settings = LoggingSettings {
            level: "debug".to_string(),
            json: true,
            ..LoggingSettings::default()
        };
        settings
            .modules
            .insert("config_sync::sync".to_string(), "trace".to_string());

        let config = LogConfig::from_settings(&settings).unwrap();
        assert_eq!(config.level, LevelFilter::Debug);
        assert!(config.json_format);
        assert!(config.console);
        assert_eq!(config.module_levels["config_sync::sync"], LevelFilter::Trace);

        settings.level = "loud".to_string();
        assert!(LogConfig::from_settings(&settings).is_err());
    }
}
