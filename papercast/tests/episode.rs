use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use papercast::core::assembler::{AssemblerSettings, SpeechAssembler};
use papercast::core::cache::ArtifactCache;
use papercast::core::config::{EpisodeConfig, SpeakerConfig};
use papercast::core::document::Document;
use papercast::core::error::PapercastError;
use papercast::core::llm::{GenerationRequest, Generator};
use papercast::core::pipeline::{StagedPipeline, TranscriptRecord};
use papercast::core::prompt::PromptLibrary;
use papercast::core::studio::Studio;
use papercast::core::transcript::{SpeakerRegistry, Voice};
use papercast::core::tts::{Clip, DecodingParams, SpeechBackend};

const PROMPTS: &str = include_str!("../../prompts.toml");

/// Answers by stage: the dialogue stage is the one with a 4096-token budget.
struct StageAwareModel {
    calls: AtomicUsize,
}

#[async_trait]
impl Generator for StageAwareModel {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.max_tokens == 4096 {
            Ok("**Justin:** Welcome to the show!\n\
                **Narrator:** (not a host)\n\
                **Emma:** Today: sparse experts.\n\
                **Justin:** Let's dig in."
                .to_string())
        } else if request.temperature == 0.1 {
            Ok("Mixture of experts".to_string())
        } else {
            Ok("1. How are experts routed?".to_string())
        }
    }
}

/// 24 kHz clips, one second per word.
struct OneSecondPerWord {
    fail_seed: Option<u64>,
}

#[async_trait]
impl SpeechBackend for OneSecondPerWord {
    async fn refine(&self, text: &str, _voice: &Voice, _params: &DecodingParams) -> anyhow::Result<String> {
        Ok(text.to_lowercase())
    }

    async fn synthesize(&self, text: &str, voice: &Voice, _params: &DecodingParams) -> anyhow::Result<Clip> {
        if self.fail_seed.is_some() && voice.seed == self.fail_seed {
            return Err(anyhow::anyhow!("speech server returned 500"));
        }
        let words = text.split_whitespace().count();
        Ok(Clip { sample_rate: 24000, samples: vec![0.1; words * 24000] })
    }
}

fn speakers() -> SpeakerRegistry {
    SpeakerRegistry::from_config(&[
        SpeakerConfig { name: "Justin".to_string(), seed: Some(2800), embedding: None },
        SpeakerConfig { name: "Emma".to_string(), seed: Some(2400), embedding: None },
    ])
}

fn document() -> Document {
    Document {
        doc_id: "2405.04434".to_string(),
        title: "DeepSeek-V2".to_string(),
        authors: vec!["DeepSeek-AI".to_string()],
        abstract_text: "A strong, economical MoE language model.".to_string(),
        content: "1 Introduction\nWe present DeepSeek-V2.".to_string(),
        sections: None,
    }
}

fn studio(root: &std::path::Path, model: Arc<StageAwareModel>, backend: OneSecondPerWord) -> Studio {
    let prompts = PromptLibrary::from_toml(PROMPTS).unwrap();
    let pipeline = StagedPipeline::new(model, prompts, ArtifactCache::new(root));
    let assembler = SpeechAssembler::new(
        Arc::new(backend),
        speakers(),
        DecodingParams::default(),
        AssemblerSettings { concurrency: 2, ..AssemblerSettings::default() },
    );
    Studio::new(pipeline, assembler)
}

#[tokio::test]
async fn paper_becomes_audio_with_subtitles() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(StageAwareModel { calls: AtomicUsize::new(0) });
    let studio = studio(dir.path(), model.clone(), OneSecondPerWord { fail_seed: None });

    let mut config = EpisodeConfig::new("https://arxiv.org/abs/2405.04434", "12");
    config.lead_in_offset = 2.0;
    let episode = studio.synthesize_episode(&document(), &config).await.unwrap();

    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    assert_eq!(episode.transcript.topic, "Mixture of experts");
    let speakers: Vec<_> = episode.utterances.iter().map(|u| u.speaker.as_str()).collect();
    assert_eq!(speakers, vec!["Justin", "Emma", "Justin"]);
    assert_eq!(episode.utterances[1].text, "Today  sparse experts.");

    // 4 + 3 + 4 words, one second each.
    assert_eq!(episode.audio.samples.len(), 11 * 24000);
    assert_eq!(episode.subtitles.len(), 4);
    assert_eq!(episode.subtitles[0].caption, "[AI GENERATED MUSIC]");
    assert_eq!(episode.subtitles[3].end.as_millis(), 13_000);
    assert_eq!(episode.refined_text[0], "welcome to the show,");

    let out = dir.path().join("audio");
    let files = episode.export(&out, "2405.04434.wav").await.unwrap();
    let srt = std::fs::read_to_string(&files.subtitles).unwrap();
    assert!(srt.contains("2\n00:00:02,000 --> 00:00:06,000\nWelcome to the show,\n"));
    assert!(srt.contains("4\n00:00:09,000 --> 00:00:13,000\nLet s dig in.\n"));
    assert!(files.audio.exists());
    assert!(files.refined_text.exists());
}

#[tokio::test]
async fn cached_transcript_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(StageAwareModel { calls: AtomicUsize::new(0) });
    let studio = studio(dir.path(), model.clone(), OneSecondPerWord { fail_seed: None });

    let mut config = EpisodeConfig::new("https://arxiv.org/abs/2405.04434", "12");
    config.use_cache = true;
    let first = studio.synthesize_episode(&document(), &config).await.unwrap();
    let second = studio.synthesize_episode(&document(), &config).await.unwrap();

    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    assert_eq!(first.transcript, second.transcript);
    assert_eq!(first.audio, second.audio);

    let record: TranscriptRecord = studio
        .pipeline()
        .cache()
        .transcripts
        .load("2405.04434")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.summary, first.transcript.summary);
}

#[tokio::test]
async fn synthesis_failure_produces_no_episode() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(StageAwareModel { calls: AtomicUsize::new(0) });
    let studio = studio(dir.path(), model, OneSecondPerWord { fail_seed: Some(2400) });

    let config = EpisodeConfig::new("https://arxiv.org/abs/2405.04434", "12");
    let err = studio.synthesize_episode(&document(), &config).await.unwrap_err();
    match err {
        PapercastError::Synthesis { sequence_id, speaker, .. } => {
            assert_eq!(sequence_id, 2);
            assert_eq!(speaker, "Emma");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!dir.path().join("audio").exists());
}

#[tokio::test]
async fn synthesis_failure_leaves_transcript_uncached() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(StageAwareModel { calls: AtomicUsize::new(0) });
    let failing = studio(dir.path(), model.clone(), OneSecondPerWord { fail_seed: Some(2400) });

    let mut config = EpisodeConfig::new("https://arxiv.org/abs/2405.04434", "12");
    config.use_cache = true;
    let err = failing.synthesize_episode(&document(), &config).await.unwrap_err();
    assert!(matches!(err, PapercastError::Synthesis { .. }));
    assert!(!dir.path().join("transcripts").join("2405.04434.json").exists());
    assert!(failing.pipeline().cache().transcripts.load::<TranscriptRecord>("2405.04434").await.unwrap().is_none());

    // The retry regenerates, and only its success is cached.
    let working = studio(dir.path(), model.clone(), OneSecondPerWord { fail_seed: None });
    working.synthesize_episode(&document(), &config).await.unwrap();
    assert_eq!(model.calls.load(Ordering::SeqCst), 6);
    assert!(dir.path().join("transcripts").join("2405.04434.json").exists());
}

#[test]
fn shipped_prompt_library_has_every_stage() {
    let prompts = PromptLibrary::from_toml(PROMPTS).unwrap();
    for name in [
        "topic_prompt",
        "research_question_prompt",
        "first_pass_prompt",
        "second_pass_prompt",
        "third_pass_prompt",
        "dialogue_prompt",
        "monologue_prompt",
        "three_pass_dialogue_prompt",
    ] {
        assert!(prompts.get(name).is_ok(), "{} missing", name);
    }
}
