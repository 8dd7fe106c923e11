use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{PapercastError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub speakers: Vec<SpeakerConfig>,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub api_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TtsConfig {
    pub api_url: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_refine_seed")]
    pub refine_seed: u64,
    #[serde(default = "default_true")]
    pub refine_text: bool,
    #[serde(default = "default_refine_prompt")]
    pub refine_prompt: String,
    #[serde(default = "default_speed_prompt")]
    pub speed_prompt: String,
    #[serde(default = "default_concurrency")]
    pub synthesis_concurrency: usize,
    pub normalize_dbfs: Option<f32>,
    pub compressor: Option<CompressorConfig>,
}

/// Dynamic range compression applied after loudness normalization.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CompressorConfig {
    #[serde(default = "default_threshold_dbfs")]
    pub threshold_dbfs: f32,
    #[serde(default = "default_ratio")]
    pub ratio: f32,
    #[serde(default = "default_attack_ms")]
    pub attack_ms: f32,
    #[serde(default = "default_release_ms")]
    pub release_ms: f32,
}

/// One registered voice. Either a sampling seed or a pre-computed speaker
/// embedding (path understood by the speech server) selects the timbre.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SpeakerConfig {
    pub name: String,
    pub seed: Option<u64>,
    pub embedding: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_prompts")]
    pub prompts: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            audio_dir: default_audio_dir(),
            logs_dir: default_logs_dir(),
            prompts: default_prompts(),
        }
    }
}

/// Per-episode run file.
#[derive(Debug, Deserialize, Clone)]
pub struct EpisodeConfig {
    pub source: String,
    #[serde(deserialize_with = "string_or_number")]
    pub episode: String,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default = "default_none_text")]
    pub background_knowledge: String,
    #[serde(default = "default_prompt_name")]
    pub prompt: String,
    #[serde(default = "default_none_text")]
    pub additional_research_questions: String,
    #[serde(default)]
    pub lead_in_offset: f64,
    pub output: Option<String>,
}

impl EpisodeConfig {
    pub fn new(source: impl Into<String>, episode: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            episode: episode.into(),
            use_cache: false,
            background_knowledge: default_none_text(),
            prompt: default_prompt_name(),
            additional_research_questions: default_none_text(),
            lead_in_offset: 0.0,
            output: None,
        }
    }

    /// Background knowledge flattened to one line, as templates expect.
    pub fn background_knowledge_line(&self) -> String {
        self.background_knowledge.replace(['\r', '\n'], " ")
    }

    pub fn validate(&self) -> Result<()> {
        if !self.lead_in_offset.is_finite() || self.lead_in_offset < 0.0 {
            return Err(PapercastError::Config {
                message: format!("lead_in_offset must be >= 0, got {}", self.lead_in_offset),
            });
        }
        if self.prompt.trim().is_empty() {
            return Err(PapercastError::Config {
                message: "prompt template name is empty".to_string(),
            });
        }
        Ok(())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

fn default_sample_rate() -> u32 { 24000 }
fn default_temperature() -> f32 { 0.7 }
fn default_top_p() -> f32 { 0.3 }
fn default_top_k() -> u32 { 20 }
fn default_refine_seed() -> u64 { 43 }
fn default_true() -> bool { true }
fn default_refine_prompt() -> String { "[oral_1][laugh_0][break_5]".to_string() }
fn default_speed_prompt() -> String { "[speed_1]".to_string() }
fn default_concurrency() -> usize { 1 }
fn default_threshold_dbfs() -> f32 { -20.0 }
fn default_ratio() -> f32 { 4.0 }
fn default_attack_ms() -> f32 { 5.0 }
fn default_release_ms() -> f32 { 50.0 }
fn default_cache_dir() -> PathBuf { PathBuf::from("cache") }
fn default_audio_dir() -> PathBuf { PathBuf::from("audio") }
fn default_logs_dir() -> PathBuf { PathBuf::from("logs") }
fn default_prompts() -> PathBuf { PathBuf::from("prompts.toml") }
fn default_none_text() -> String { "None".to_string() }
fn default_prompt_name() -> String { "dialogue_prompt".to_string() }

pub const DEFAULT_CONFIG: &str = r#"
[llm]
model = "gpt-4o"
api_url = "https://api.openai.com/v1"

[tts]
api_url = "http://localhost:9966"
sample_rate = 24000
normalize_dbfs = -10.0

[tts.compressor]
threshold_dbfs = -20.0
ratio = 4.0
attack_ms = 5.0
release_ms = 50.0

[[speakers]]
name = "Justin"
seed = 2800

[[speakers]]
name = "Emma"
seed = 2400

[[speakers]]
name = "Danzai"
seed = 4600

[[speakers]]
name = "Doudou"
seed = 13200

[paths]
cache_dir = "cache"
audio_dir = "audio"
logs_dir = "logs"
prompts = "prompts.toml"
"#;

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    if config.speakers.is_empty() {
        return Err(PapercastError::Config {
            message: "at least one [[speakers]] entry is required".to_string(),
        });
    }
    if config.tts.synthesis_concurrency == 0 {
        return Err(PapercastError::Config {
            message: "tts.synthesis_concurrency must be at least 1".to_string(),
        });
    }
    Ok(config)
}

pub fn load_episode(path: impl AsRef<Path>) -> Result<EpisodeConfig> {
    let content = fs::read_to_string(path)?;
    let episode: EpisodeConfig = toml::from_str(&content)?;
    episode.validate()?;
    Ok(episode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.tts.sample_rate, 24000);
        assert_eq!(config.tts.top_k, 20);
        assert_eq!(config.tts.refine_seed, 43);
        assert!(config.tts.refine_text);
        assert_eq!(config.tts.normalize_dbfs, Some(-10.0));
        assert_eq!(
            config.tts.compressor,
            Some(CompressorConfig { threshold_dbfs: -20.0, ratio: 4.0, attack_ms: 5.0, release_ms: 50.0 })
        );
        assert_eq!(config.speakers.len(), 4);
        assert_eq!(config.speakers[0].seed, Some(2800));
        assert_eq!(config.paths.prompts, PathBuf::from("prompts.toml"));
    }

    #[test]
    fn episode_accepts_numeric_episode() {
        let episode: EpisodeConfig = toml::from_str(
            r#"
source = "https://arxiv.org/abs/2405.04434"
episode = 7
background_knowledge = "Mixture of experts.\nSparse attention."
"#,
        )
        .unwrap();
        assert_eq!(episode.episode, "7");
        assert_eq!(episode.prompt, "dialogue_prompt");
        assert_eq!(episode.additional_research_questions, "None");
        assert_eq!(episode.lead_in_offset, 0.0);
        assert!(!episode.use_cache);
        assert_eq!(
            episode.background_knowledge_line(),
            "Mixture of experts. Sparse attention."
        );
    }

    #[test]
    fn negative_offset_is_rejected() {
        let mut episode = EpisodeConfig::new("paper.pdf", "1");
        episode.lead_in_offset = -1.0;
        assert!(matches!(
            episode.validate(),
            Err(PapercastError::Config { .. })
        ));
    }

    #[test]
    fn load_config_requires_speakers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
speakers = []
[llm]
model = "m"
api_url = "http://localhost"
[tts]
api_url = "http://localhost"
"#,
        )
        .unwrap();
        assert!(matches!(load_config(&path), Err(PapercastError::Config { .. })));
    }
}
