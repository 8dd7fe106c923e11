use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use papercast::core::assembler::{AssemblerSettings, SpeechAssembler};
use papercast::core::cache::ArtifactCache;
use papercast::core::config::{load_config, load_episode, DEFAULT_CONFIG};
use papercast::core::document::PdftotextExtractor;
use papercast::core::llm::LlmClient;
use papercast::core::pipeline::StagedPipeline;
use papercast::core::prompt::PromptLibrary;
use papercast::core::source::DocumentResolver;
use papercast::core::studio::Studio;
use papercast::core::transcript::SpeakerRegistry;
use papercast::core::tts::{DecodingParams, HttpSpeechBackend};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config_path = "config.toml";

    // Create a default config on first run
    if !Path::new(config_path).exists() {
        std::fs::write(config_path, DEFAULT_CONFIG)?;
        log::info!("Wrote default {}", config_path);
    }

    let episode_path = std::env::args().nth(1).unwrap_or_else(|| "episode.toml".to_string());

    let config = load_config(config_path)?;
    let episode = load_episode(&episode_path).with_context(|| format!("failed to load {}", episode_path))?;
    let prompts = PromptLibrary::load(&config.paths.prompts)
        .with_context(|| format!("failed to load prompts from {}", config.paths.prompts.display()))?;

    let llm = Arc::new(LlmClient::new(config.llm.clone()));
    let speech = Arc::new(HttpSpeechBackend::new(&config.tts));
    let cache = ArtifactCache::new(&config.paths.cache_dir);

    let resolver = DocumentResolver::new(
        cache.clone(),
        &config.paths.cache_dir,
        llm.clone(),
        Arc::new(PdftotextExtractor::default()),
    );
    let pipeline = StagedPipeline::new(llm, prompts, cache).with_trace_dir(&config.paths.logs_dir);
    let assembler = SpeechAssembler::new(
        speech,
        SpeakerRegistry::from_config(&config.speakers),
        DecodingParams::from_config(&config.tts),
        AssemblerSettings {
            sample_rate: config.tts.sample_rate,
            refine_text: config.tts.refine_text,
            concurrency: config.tts.synthesis_concurrency,
            normalize_dbfs: config.tts.normalize_dbfs,
            compressor: config.tts.compressor.clone(),
        },
    );
    let studio = Studio::new(pipeline, assembler);

    log::info!("Starting episode {} from {}", episode.episode, episode.source);

    let document = resolver.resolve(&episode.source, episode.use_cache).await?;
    let result = studio.synthesize_episode(&document, &episode).await?;

    let name = episode
        .output
        .clone()
        .unwrap_or_else(|| format!("{}.wav", document.doc_id.replace('/', "_")));
    let files = result.export(&config.paths.audio_dir, &name).await?;

    log::info!(
        "Episode {} done: {} utterances, audio {}",
        episode.episode,
        result.utterances.len(),
        files.audio.display()
    );

    Ok(())
}
