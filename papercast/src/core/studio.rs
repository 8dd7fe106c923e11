use std::path::Path;

use crate::core::assembler::{export_episode, AudioArtifact, ExportedFiles, SpeechAssembler};
use crate::core::config::EpisodeConfig;
use crate::core::document::Document;
use crate::core::error::Result;
use crate::core::pipeline::{StagedPipeline, TranscriptRecord};
use crate::core::timeline::TimelineSegment;
use crate::core::transcript::{parse_transcript, Utterance};

/// A finished episode: the transcript record plus its audio rendition.
#[derive(Debug, Clone)]
pub struct Episode {
    pub transcript: TranscriptRecord,
    pub utterances: Vec<Utterance>,
    pub audio: AudioArtifact,
    pub subtitles: Vec<TimelineSegment>,
    pub refined_text: Vec<String>,
}

impl Episode {
    /// Write the episode as `<dir>/<name>` plus its subtitle and refined-text
    /// companions.
    pub async fn export(&self, dir: &Path, name: &str) -> Result<ExportedFiles> {
        export_episode(&self.audio, &self.subtitles, &self.refined_text, dir, name).await
    }
}

/// Document in, episode out.
pub struct Studio {
    pipeline: StagedPipeline,
    assembler: SpeechAssembler,
}

impl Studio {
    pub fn new(pipeline: StagedPipeline, assembler: SpeechAssembler) -> Self {
        Self { pipeline, assembler }
    }

    pub fn pipeline(&self) -> &StagedPipeline {
        &self.pipeline
    }

    /// Generate, parse and voice the transcript. The transcript record is
    /// cached only once the audio has been assembled.
    pub async fn synthesize_episode(&self, document: &Document, config: &EpisodeConfig) -> Result<Episode> {
        let transcript = self.pipeline.run(document, config).await?;

        let utterances = parse_transcript(&transcript.summary, self.assembler.speakers());
        log::info!(
            "Episode {} of {}: {} utterances",
            config.episode,
            document.doc_id,
            utterances.len()
        );

        let assembled = self.assembler.assemble(&utterances, config.lead_in_offset).await?;
        self.pipeline.store(&transcript).await?;
        Ok(Episode {
            transcript,
            utterances,
            audio: assembled.audio,
            subtitles: assembled.subtitles,
            refined_text: assembled.refined_text,
        })
    }
}
