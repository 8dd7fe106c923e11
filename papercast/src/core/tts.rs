use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use crate::core::config::TtsConfig;
use crate::core::transcript::Voice;

/// Decoding settings held constant for a whole episode so every speaker keeps
/// the same delivery from line to line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub refine_seed: u64,
    pub refine_prompt: String,
    pub speed_prompt: String,
}

impl DecodingParams {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            refine_seed: config.refine_seed,
            refine_prompt: config.refine_prompt.clone(),
            speed_prompt: config.speed_prompt.clone(),
        }
    }
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.3,
            top_k: 20,
            refine_seed: 43,
            refine_prompt: "[oral_1][laugh_0][break_5]".to_string(),
            speed_prompt: "[speed_1]".to_string(),
        }
    }
}

/// Mono waveform returned by the backend for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl Clip {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Rewrite text into a more speakable form. Deterministic for a given
    /// `params.refine_seed`.
    async fn refine(&self, text: &str, voice: &Voice, params: &DecodingParams) -> Result<String>;

    /// Synthesize `text` with the given voice.
    async fn synthesize(&self, text: &str, voice: &Voice, params: &DecodingParams) -> Result<Clip>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice: &'a Voice,
    #[serde(flatten)]
    params: &'a DecodingParams,
}

#[derive(Deserialize)]
struct RefineResponse {
    text: String,
}

/// Client for a speech server exposing `POST /refine` (JSON `{text}` back)
/// and `POST /synthesize` (WAV bytes back).
pub struct HttpSpeechBackend {
    client: Client,
    api_url: String,
}

impl HttpSpeechBackend {
    pub fn new(config: &TtsConfig) -> Self {
        log::info!("TTS backend at {}", config.api_url);
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_url: config.api_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, endpoint: &str, request: &SpeechRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.api_url, endpoint);
        let res = match self.client.post(&url).json(request).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Failed to connect to TTS at {}: {}", url, e);
                return Err(anyhow::anyhow!("TTS Connection Failed: {}", e));
            }
        };
        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            log::error!("TTS Error {}: {}", status, error_text);
            return Err(anyhow::anyhow!("TTS API Error {}: {}", status, error_text));
        }
        Ok(res)
    }
}

#[async_trait]
impl SpeechBackend for HttpSpeechBackend {
    async fn refine(&self, text: &str, voice: &Voice, params: &DecodingParams) -> Result<String> {
        let request = SpeechRequest { text, voice, params };
        let res = self.post("refine", &request).await?;
        let body: RefineResponse = res.json().await?;
        Ok(body.text)
    }

    async fn synthesize(&self, text: &str, voice: &Voice, params: &DecodingParams) -> Result<Clip> {
        let request = SpeechRequest { text, voice, params };
        let res = self.post("synthesize", &request).await?;
        let bytes = res.bytes().await?;
        decode_wav(&bytes)
    }
}

/// Decode WAV bytes into mono f32 samples. Multi-channel input is averaged.
pub fn decode_wav(bytes: &[u8]) -> Result<Clip> {
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    Ok(Clip {
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Encode mono f32 samples as 16-bit PCM WAV.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
