use anyhow::Result;
use papercast::core::config::load_config;
use papercast::core::transcript::SpeakerRegistry;
use papercast::core::tts::{encode_wav, DecodingParams, HttpSpeechBackend, SpeechBackend};
use std::fs;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting TTS test...");

    let config_path = "config.toml";
    if !Path::new(config_path).exists() {
        log::error!("Config file not found at {}", config_path);
        return Ok(());
    }

    let config = load_config(config_path)?;
    log::info!("Loaded config with TTS server: {}", config.tts.api_url);

    let speakers = SpeakerRegistry::from_config(&config.speakers);
    let Some(speaker) = config.speakers.first() else {
        log::error!("No speakers configured");
        return Ok(());
    };
    let Some(voice) = speakers.voice(&speaker.name) else {
        log::error!("No voice registered for {}", speaker.name);
        return Ok(());
    };

    let backend = HttpSpeechBackend::new(&config.tts);
    let params = DecodingParams::from_config(&config.tts);

    let text = "Welcome back to the show. Today we are reading a paper about sparse mixture of experts.";
    log::info!("Generating audio for {}: {}", speaker.name, text);

    let refined = if config.tts.refine_text {
        backend.refine(text, voice, &params).await?
    } else {
        text.to_string()
    };
    log::info!("Refined text: {}", refined);

    match backend.synthesize(&refined, voice, &params).await {
        Ok(clip) => {
            log::info!(
                "Audio generated successfully. {:.2}s at {} Hz",
                clip.duration_secs(),
                clip.sample_rate
            );
            let output_path = "test_output.wav";
            fs::write(output_path, encode_wav(&clip.samples, clip.sample_rate)?)?;
            log::info!("Saved audio to {}", output_path);
        }
        Err(e) => {
            log::error!("Failed to generate audio: {:?}", e);
        }
    }

    Ok(())
}
