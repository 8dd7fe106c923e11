use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::CompressorConfig;
use crate::core::error::{PapercastError, Result};
use crate::core::timeline::{build_timeline, to_srt, TimelineSegment};
use crate::core::transcript::{SpeakerRegistry, Utterance};
use crate::core::tts::{encode_wav, DecodingParams, SpeechBackend};

/// Concatenated episode audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioArtifact {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Everything produced from one utterance sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledEpisode {
    pub audio: AudioArtifact,
    pub subtitles: Vec<TimelineSegment>,
    pub refined_text: Vec<String>,
}

impl AssembledEpisode {
    pub async fn export(&self, dir: &Path, name: &str) -> Result<ExportedFiles> {
        export_episode(&self.audio, &self.subtitles, &self.refined_text, dir, name).await
    }
}

#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub sample_rate: u32,
    pub refine_text: bool,
    pub concurrency: usize,
    pub normalize_dbfs: Option<f32>,
    pub compressor: Option<CompressorConfig>,
}

impl Default for AssemblerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            refine_text: true,
            concurrency: 1,
            normalize_dbfs: None,
            compressor: None,
        }
    }
}

struct SynthesizedLine {
    samples: Vec<f32>,
    refined_text: String,
}

pub struct SpeechAssembler {
    backend: Arc<dyn SpeechBackend>,
    speakers: SpeakerRegistry,
    params: DecodingParams,
    settings: AssemblerSettings,
}

impl SpeechAssembler {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        speakers: SpeakerRegistry,
        params: DecodingParams,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            backend,
            speakers,
            params,
            settings,
        }
    }

    pub fn speakers(&self) -> &SpeakerRegistry {
        &self.speakers
    }

    async fn synthesize_line(&self, utterance: &Utterance) -> Result<SynthesizedLine> {
        let fail = |source: anyhow::Error| PapercastError::Synthesis {
            sequence_id: utterance.sequence_id,
            speaker: utterance.speaker.clone(),
            source,
        };
        let voice = self
            .speakers
            .voice(&utterance.speaker)
            .ok_or_else(|| fail(anyhow::anyhow!("speaker has no registered voice")))?;

        let refined_text = if self.settings.refine_text {
            self.backend
                .refine(&utterance.text, voice, &self.params)
                .await
                .map_err(fail)?
        } else {
            utterance.text.clone()
        };

        let start = std::time::Instant::now();
        let clip = self
            .backend
            .synthesize(&refined_text, voice, &self.params)
            .await
            .map_err(fail)?;
        if clip.sample_rate != self.settings.sample_rate {
            return Err(fail(anyhow::anyhow!(
                "backend returned {} Hz audio, expected {} Hz",
                clip.sample_rate,
                self.settings.sample_rate
            )));
        }
        log::info!(
            "Utterance {} ({}) synthesized: {:.2}s of audio in {:.2?}",
            utterance.sequence_id,
            utterance.speaker,
            clip.duration_secs(),
            start.elapsed()
        );

        Ok(SynthesizedLine {
            samples: clip.samples,
            refined_text,
        })
    }

    /// Synthesize every utterance and lay them out back to back after
    /// `lead_in_offset` seconds. One failed utterance fails the whole episode.
    pub async fn assemble(&self, utterances: &[Utterance], lead_in_offset: f64) -> Result<AssembledEpisode> {
        if utterances.is_empty() {
            log::warn!("No utterances to synthesize; producing an empty episode");
        }

        let mut ordered: Vec<&Utterance> = utterances.iter().collect();
        ordered.sort_by_key(|u| u.sequence_id);

        // `buffered` yields results in input order regardless of completion order.
        let lines: Vec<SynthesizedLine> = stream::iter(ordered.iter().map(|u| self.synthesize_line(u)))
            .buffered(self.settings.concurrency.max(1))
            .try_collect()
            .await?;

        let subtitles = build_timeline(
            lines
                .iter()
                .zip(&ordered)
                .map(|(line, utterance)| (line.samples.len(), utterance.text.as_str())),
            self.settings.sample_rate,
            lead_in_offset,
        );

        let total: usize = lines.iter().map(|l| l.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        let mut refined_text = Vec::with_capacity(lines.len());
        for line in lines {
            samples.extend(line.samples);
            refined_text.push(line.refined_text);
        }
        if let Some(target) = self.settings.normalize_dbfs {
            normalize_loudness(&mut samples, target);
        }
        if let Some(compressor) = &self.settings.compressor {
            compress_dynamic_range(&mut samples, self.settings.sample_rate, compressor);
        }

        let audio = AudioArtifact {
            sample_rate: self.settings.sample_rate,
            samples,
        };
        log::info!(
            "Assembled {} utterances, {:.1}s of audio",
            refined_text.len(),
            audio.duration_secs()
        );

        Ok(AssembledEpisode {
            audio,
            subtitles,
            refined_text,
        })
    }
}

/// Scale samples so their RMS level sits at `target_dbfs`, backing off the
/// gain if that would clip.
pub fn normalize_loudness(samples: &mut [f32], target_dbfs: f32) {
    if samples.is_empty() {
        return;
    }
    let mean_square = samples.iter().map(|s| (*s as f64).powi(2)).sum::<f64>() / samples.len() as f64;
    if mean_square <= 0.0 {
        return;
    }
    let current_dbfs = 10.0 * mean_square.log10();
    let mut gain = 10f64.powf((target_dbfs as f64 - current_dbfs) / 20.0);
    let peak = samples.iter().fold(0f32, |acc, s| acc.max(s.abs())) as f64;
    if peak * gain > 1.0 {
        gain = 1.0 / peak;
    }
    for s in samples.iter_mut() {
        *s = (*s as f64 * gain) as f32;
    }
}

/// Downward compressor with an attack/release envelope follower. Above
/// `threshold_dbfs` the level is reduced by `ratio`.
pub fn compress_dynamic_range(samples: &mut [f32], sample_rate: u32, config: &CompressorConfig) {
    if samples.is_empty() || sample_rate == 0 || config.ratio <= 1.0 {
        return;
    }
    let threshold = 10f64.powf(config.threshold_dbfs as f64 / 20.0);
    let smoothing = |ms: f32| {
        let n = ms.max(0.0) as f64 * sample_rate as f64 / 1000.0;
        if n < 1.0 {
            0.0
        } else {
            (-1.0 / n).exp()
        }
    };
    let attack = smoothing(config.attack_ms);
    let release = smoothing(config.release_ms);
    let slope = 1.0 - 1.0 / config.ratio as f64;

    let mut envelope = 0f64;
    for s in samples.iter_mut() {
        let level = (*s as f64).abs();
        let coef = if level > envelope { attack } else { release };
        envelope = coef * envelope + (1.0 - coef) * level;
        if envelope > threshold {
            let over_db = 20.0 * (envelope / threshold).log10();
            let gain = 10f64.powf(-over_db * slope / 20.0);
            *s = (*s as f64 * gain) as f32;
        }
    }
}

/// Paths of one exported episode.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFiles {
    pub audio: PathBuf,
    pub subtitles: PathBuf,
    pub refined_text: PathBuf,
}

impl ExportedFiles {
    pub fn for_name(dir: &Path, name: &str) -> Self {
        Self {
            audio: dir.join(name),
            subtitles: dir.join(format!("subtitle_{}.srt", name)),
            refined_text: dir.join(format!("refined_text_{}.txt", name)),
        }
    }
}

/// Write the WAV, the SRT and the refined-text log. All three are staged as
/// temporaries and only renamed into place once every write succeeded; a
/// failed rename takes back the files already moved.
pub async fn export_episode(
    audio: &AudioArtifact,
    subtitles: &[TimelineSegment],
    refined_text: &[String],
    dir: &Path,
    name: &str,
) -> Result<ExportedFiles> {
    tokio::fs::create_dir_all(dir).await?;
    let files = ExportedFiles::for_name(dir, name);

    let wav = encode_wav(&audio.samples, audio.sample_rate).map_err(|e| {
        PapercastError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    })?;
    let srt = to_srt(subtitles);
    let mut refined = String::new();
    for line in refined_text {
        refined.push_str(line);
        refined.push('\n');
    }

    let staged = [
        (files.audio.clone(), wav),
        (files.subtitles.clone(), srt.into_bytes()),
        (files.refined_text.clone(), refined.into_bytes()),
    ];
    let token = uuid::Uuid::new_v4().simple().to_string();
    let mut written: Vec<(PathBuf, PathBuf)> = Vec::new();

    for (target, data) in staged {
        let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".{}.tmp", token));
        let tmp = target.with_file_name(tmp_name);
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            for (tmp, _) in &written {
                let _ = tokio::fs::remove_file(tmp).await;
            }
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        written.push((tmp, target));
    }
    let mut moved: Vec<&PathBuf> = Vec::new();
    for (idx, (tmp, target)) in written.iter().enumerate() {
        if let Err(e) = tokio::fs::rename(tmp, target).await {
            log::error!("Failed to move {} into place: {}", target.display(), e);
            for done in &moved {
                let _ = tokio::fs::remove_file(done).await;
            }
            for (pending, _) in &written[idx..] {
                let _ = tokio::fs::remove_file(pending).await;
            }
            return Err(e.into());
        }
        moved.push(target);
    }

    log::info!(
        "Audio saved to {}, subtitles to {}, refined text to {}",
        files.audio.display(),
        files.subtitles.display(),
        files.refined_text.display()
    );
    Ok(files)
}
