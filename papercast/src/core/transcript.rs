//! Dialogue text → ordered, speaker-attributed utterances.

use std::collections::BTreeMap;

use crate::core::config::SpeakerConfig;

/// How the speech backend picks a voice for a speaker.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Voice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
}

/// Registered speakers and their voices.
#[derive(Debug, Clone, Default)]
pub struct SpeakerRegistry {
    voices: BTreeMap<String, Voice>,
}

impl SpeakerRegistry {
    pub fn from_config(speakers: &[SpeakerConfig]) -> Self {
        let mut registry = Self::default();
        for speaker in speakers {
            registry.register(
                &speaker.name,
                Voice {
                    seed: speaker.seed,
                    embedding: speaker.embedding.clone(),
                },
            );
        }
        registry
    }

    pub fn register(&mut self, name: &str, voice: Voice) {
        self.voices.insert(name.to_string(), voice);
    }

    pub fn voice(&self, speaker: &str) -> Option<&Voice> {
        self.voices.get(speaker)
    }

    pub fn contains(&self, speaker: &str) -> bool {
        self.voices.contains_key(speaker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub sequence_id: u32,
    pub speaker: String,
    pub text: String,
}

/// Replace characters the synthesizer reads aloud or stumbles on.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '?' | '!' => ',',
            '\'' | '’' | '-' | '(' | ')' | '"' | ':' => ' ',
            other => other,
        })
        .collect()
}

/// Split one `**Speaker:** text` line into speaker and raw text.
fn split_speaker_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("**")?;
    let (speaker, text) = rest.split_once("**")?;
    let speaker = speaker.trim_end_matches(|c: char| c == ':' || c.is_whitespace()).trim();
    let text = text.trim_start_matches(|c: char| c == ':' || c.is_whitespace()).trim_end();
    Some((speaker, text))
}

/// Parse dialogue lines into utterances. Lines for unregistered speakers are
/// skipped and do not consume a sequence id.
pub fn parse_transcript(dialogue: &str, speakers: &SpeakerRegistry) -> Vec<Utterance> {
    let mut utterances = Vec::new();
    let mut dropped = 0usize;

    for line in dialogue.lines() {
        let Some((speaker, text)) = split_speaker_line(line) else {
            continue;
        };
        if !speakers.contains(speaker) {
            dropped += 1;
            continue;
        }
        utterances.push(Utterance {
            sequence_id: utterances.len() as u32 + 1,
            speaker: speaker.to_string(),
            text: sanitize_text(text).trim().to_string(),
        });
    }

    if dropped > 0 {
        log::debug!("Dropped {} dialogue lines from unregistered speakers", dropped);
    }
    utterances
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SpeakerRegistry {
        SpeakerRegistry::from_config(&[
            SpeakerConfig { name: "Justin".to_string(), seed: Some(2800), embedding: None },
            SpeakerConfig { name: "Emma".to_string(), seed: Some(2400), embedding: None },
        ])
    }

    #[test]
    fn parses_known_speakers_and_drops_others() {
        let dialogue = "**Justin:** How does it work?\n**Unknown:** ignored\n**Emma:** It scales well.";
        let utterances = parse_transcript(dialogue, &registry());
        assert_eq!(
            utterances,
            vec![
                Utterance { sequence_id: 1, speaker: "Justin".to_string(), text: "How does it work,".to_string() },
                Utterance { sequence_id: 2, speaker: "Emma".to_string(), text: "It scales well.".to_string() },
            ]
        );
    }

    #[test]
    fn ignores_non_dialogue_lines() {
        let dialogue = "# Episode 3\n\nIntro music\n**Emma:** Welcome back.\n  **Justin:** indented is not dialogue";
        let utterances = parse_transcript(dialogue, &registry());
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].speaker, "Emma");
    }

    #[test]
    fn accepts_colon_outside_the_bold_marker() {
        let utterances = parse_transcript("**Justin**: Sparse experts, right?", &registry());
        assert_eq!(utterances[0].speaker, "Justin");
        assert_eq!(utterances[0].text, "Sparse experts, right,");
    }

    #[test]
    fn sequence_ids_are_contiguous() {
        let dialogue = (0..20)
            .map(|i| if i % 3 == 0 { format!("**Guest:** line {}", i) } else { format!("**Emma:** line {}", i) })
            .collect::<Vec<_>>()
            .join("\n");
        let ids: Vec<u32> = parse_transcript(&dialogue, &registry()).iter().map(|u| u.sequence_id).collect();
        assert_eq!(ids, (1..=13).collect::<Vec<u32>>());
    }

    #[test]
    fn no_recognized_lines_is_empty() {
        assert!(parse_transcript("**Host:** hi\nplain text", &registry()).is_empty());
        assert!(parse_transcript("", &registry()).is_empty());
    }

    #[test]
    fn sanitized_text_has_no_unsafe_characters() {
        let input = "Is it \"state-of-the-art\"? Yes! (Mostly): it’s Justin's claim.";
        let cleaned = sanitize_text(input);
        for c in ['?', '\'', '’', '!', '-', '(', ')', '"', ':'] {
            assert!(!cleaned.contains(c), "{} still in {}", c, cleaned);
        }
        assert_eq!(cleaned.chars().count(), input.chars().count());
    }

    #[test]
    fn registry_resolves_voices() {
        let registry = registry();
        assert_eq!(registry.voice("Emma").unwrap().seed, Some(2400));
        assert!(registry.voice("Doudou").is_none());
        assert!(registry.contains("Justin"));
    }
}
