//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `THEORIA__*` 覆盖（双下划线表示嵌套，如 `THEORIA__LLM__PROVIDER=deepseek`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::CompletionOptions;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub agents: AgentsSection,
    pub session: SessionSection,
}

/// [llm] 段：后端、模型与采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / groq / ollama ...（见 llm::provider）
    pub provider: String,
    pub model: String,
    /// 覆盖预设的 base_url（自建代理、未知后端）
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            temperature: 0.7,
            max_tokens: None,
            retry: RetrySection::default(),
        }
    }
}

impl LlmSection {
    /// 客户端默认采样参数
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: self.max_tokens,
        }
    }
}

/// [llm.retry] 段：补全网关重试策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            multiplier: 2.0,
        }
    }
}

/// [agents] 段：阶段图执行上限与各智能体参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    /// 单次运行最多执行的阶段数，超出即报错
    pub max_steps: usize,
    pub dialogue: DialogueSection,
    pub edit: EditSection,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            max_steps: 25,
            dialogue: DialogueSection::default(),
            edit: EditSection::default(),
        }
    }
}

/// [agents.dialogue] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialogueSection {
    /// 反驳达到此数后进入 synthesize
    pub objection_threshold: usize,
    /// 单轮内 clarify 最多执行次数（无论题时的自环、以及 synthesize 回到 clarify 的新一轮都受此限制）
    pub max_clarify_visits: usize,
}

impl Default for DialogueSection {
    fn default() -> Self {
        Self {
            objection_threshold: 3,
            max_clarify_visits: 1,
        }
    }
}

/// [agents.edit] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EditSection {
    /// analyze 阶段发送给模型的文档前缀字符数
    pub analyze_preview_chars: usize,
}

impl Default for EditSection {
    fn default() -> Self {
        Self {
            analyze_preview_chars: 2000,
        }
    }
}

/// [session] 段：文件会话存储目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub dir: PathBuf,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("sessions"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 THEORIA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 THEORIA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("THEORIA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
