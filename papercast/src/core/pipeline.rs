//! Staged transcript generation: topic, research questions, optional
//! three-pass critique, then the dialogue itself. Each stage's output is bound
//! into the placeholders of the stages after it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::cache::ArtifactCache;
use crate::core::config::EpisodeConfig;
use crate::core::document::Document;
use crate::core::error::{PapercastError, Result};
use crate::core::llm::{GenerationRequest, Generator};
use crate::core::prompt::{Placeholder, PromptLibrary, PromptTemplate, PromptValues};
use crate::core::trace::TraceLogger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Topic,
    ResearchQuestions,
    FirstPass,
    SecondPass,
    ThirdPass,
    Dialogue,
}

impl Stage {
    /// Prompt library entry for the stage. The dialogue template is chosen
    /// per episode instead.
    pub fn template_name(self) -> Option<&'static str> {
        match self {
            Stage::Topic => Some("topic_prompt"),
            Stage::ResearchQuestions => Some("research_question_prompt"),
            Stage::FirstPass => Some("first_pass_prompt"),
            Stage::SecondPass => Some("second_pass_prompt"),
            Stage::ThirdPass => Some("third_pass_prompt"),
            Stage::Dialogue => None,
        }
    }

    /// (temperature, max output tokens)
    pub fn sampling(self) -> (f32, u32) {
        match self {
            Stage::Topic => (0.1, 2048),
            Stage::ResearchQuestions => (0.5, 2048),
            Stage::FirstPass | Stage::SecondPass | Stage::ThirdPass => (0.3, 2048),
            Stage::Dialogue => (0.7, 4096),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Topic => "topic",
            Stage::ResearchQuestions => "research-questions",
            Stage::FirstPass => "first-pass",
            Stage::SecondPass => "second-pass",
            Stage::ThirdPass => "third-pass",
            Stage::Dialogue => "dialogue",
        };
        f.write_str(name)
    }
}

/// Cached result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    #[serde(flatten)]
    pub document: Document,
    pub topic: String,
    pub research_questions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub three_pass_analysis: Option<String>,
    /// The generated dialogue.
    pub summary: String,
}

const BASE_PLACEHOLDERS: [Placeholder; 6] = [
    Placeholder::EpisodeNumber,
    Placeholder::BackgroundKnowledge,
    Placeholder::Title,
    Placeholder::Abstract,
    Placeholder::Authors,
    Placeholder::OriginalContent,
];

fn available(extra: &[Placeholder]) -> BTreeSet<Placeholder> {
    BASE_PLACEHOLDERS.iter().chain(extra).copied().collect()
}

pub fn join_three_pass(first: &str, second: &str, third: &str) -> String {
    format!(
        "## First Pass\n{}\n\n## Second Pass\n{}\n\n## Third Pass\n{}",
        first.trim(),
        second.trim(),
        third.trim()
    )
}

/// Generated research questions followed by the caller's own, verbatim.
pub fn append_research_questions(generated: &str, additional: &str) -> String {
    let additional = additional.trim();
    if additional.is_empty() || additional == "None" {
        generated.to_string()
    } else {
        format!("{}\n{}", generated, additional)
    }
}

pub struct StagedPipeline {
    generator: Arc<dyn Generator>,
    prompts: PromptLibrary,
    cache: ArtifactCache,
    trace_dir: Option<PathBuf>,
}

impl StagedPipeline {
    pub fn new(generator: Arc<dyn Generator>, prompts: PromptLibrary, cache: ArtifactCache) -> Self {
        Self {
            generator,
            prompts,
            cache,
            trace_dir: None,
        }
    }

    /// Save a markdown trace of every run under `<logs_dir>/traces`.
    pub fn with_trace_dir(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = Some(logs_dir.into());
        self
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    fn stage_template(&self, stage: Stage) -> Result<&PromptTemplate> {
        let name = stage.template_name().unwrap_or("dialogue");
        self.prompts.get(name)
    }

    /// Reject templates that could not be fully rendered, before any model
    /// call is made.
    fn preflight(&self, dialogue: &PromptTemplate, three_pass: bool) -> Result<()> {
        self.stage_template(Stage::Topic)?.check_resolvable(&available(&[]))?;
        self.stage_template(Stage::ResearchQuestions)?
            .check_resolvable(&available(&[Placeholder::Topic]))?;
        if three_pass {
            self.stage_template(Stage::FirstPass)?.check_resolvable(&available(&[]))?;
            self.stage_template(Stage::SecondPass)?
                .check_resolvable(&available(&[Placeholder::FirstPass]))?;
            self.stage_template(Stage::ThirdPass)?
                .check_resolvable(&available(&[Placeholder::FirstPass, Placeholder::SecondPass]))?;
        }
        let mut dialogue_values = vec![Placeholder::Topic, Placeholder::ResearchQuestions];
        if three_pass {
            dialogue_values.push(Placeholder::ThreePassAnalysis);
        }
        dialogue.check_resolvable(&available(&dialogue_values))
    }

    async fn generate(
        &self,
        stage: Stage,
        system: String,
        user: String,
        trace: &mut TraceLogger,
    ) -> Result<String> {
        let (temperature, max_tokens) = stage.sampling();
        let request = GenerationRequest::chat(system, user)
            .temperature(temperature)
            .max_tokens(max_tokens);

        trace.log(&stage.to_string(), &format!("temperature {}, max_tokens {}", temperature, max_tokens));
        let response = self
            .generator
            .generate(&request)
            .await
            .map_err(|source| PapercastError::Generation { stage, source })?;
        let response = response.trim().to_string();
        if response.is_empty() {
            return Err(PapercastError::Generation {
                stage,
                source: anyhow::anyhow!("model returned an empty response"),
            });
        }

        let prompt = if request.system.is_empty() { &request.user } else { &request.system };
        trace.log_llm(&stage.to_string(), "response received", prompt, &response);
        Ok(response)
    }

    /// Produce the dialogue for `document`, or return the cached transcript
    /// when `use_cache` is set and one exists. Nothing is persisted; callers
    /// [`store`](Self::store) the record once the whole episode succeeded.
    pub async fn run(&self, document: &Document, config: &EpisodeConfig) -> Result<TranscriptRecord> {
        config.validate()?;
        document.validate()?;

        let dialogue = self.prompts.get(&config.prompt)?;
        let three_pass = dialogue.uses(Placeholder::ThreePassAnalysis);
        self.preflight(dialogue, three_pass)?;

        if config.use_cache {
            if let Some(record) = self
                .cache
                .transcripts
                .load::<TranscriptRecord>(&document.doc_id)
                .await?
            {
                log::info!("Using cached transcript for {}", document.doc_id);
                return Ok(record);
            }
        }

        let mut trace = TraceLogger::new(&document.doc_id);
        trace.log("Start", &format!("Template '{}', three-pass: {}", config.prompt, three_pass));

        let result = self.run_stages(document, config, dialogue, three_pass, &mut trace).await;

        if let Err(e) = &result {
            trace.log("Failed", &e.to_string());
        }
        if let Some(dir) = &self.trace_dir {
            match trace.save(dir) {
                Ok(path) => log::info!("Trace saved to {}", path.display()),
                Err(e) => log::error!("Failed to save execution trace: {}", e),
            }
        }

        result
    }

    /// Write the transcript record to the cache.
    pub async fn store(&self, record: &TranscriptRecord) -> Result<PathBuf> {
        self.cache.transcripts.save(&record.document.doc_id, record).await
    }

    async fn run_stages(
        &self,
        document: &Document,
        config: &EpisodeConfig,
        dialogue: &PromptTemplate,
        three_pass: bool,
        trace: &mut TraceLogger,
    ) -> Result<TranscriptRecord> {
        let mut values = PromptValues::new();
        values
            .set(Placeholder::EpisodeNumber, config.episode.clone())
            .set(Placeholder::BackgroundKnowledge, config.background_knowledge_line())
            .set(Placeholder::Title, document.title.clone())
            .set(Placeholder::Abstract, document.abstract_text.clone())
            .set(Placeholder::Authors, document.authors_line())
            .set(Placeholder::OriginalContent, document.content.clone());

        // 1. Topic
        let topic_prompt = self.stage_template(Stage::Topic)?.render(&values)?;
        let topic = self.generate(Stage::Topic, String::new(), topic_prompt, trace).await?;
        log::info!("Article topic: {}", topic);
        values.set(Placeholder::Topic, topic.clone());

        // 2. Research questions
        let rq_prompt = self.stage_template(Stage::ResearchQuestions)?.render(&values)?;
        let digest = document.section_digest().unwrap_or_default();
        let generated = self.generate(Stage::ResearchQuestions, rq_prompt, digest, trace).await?;
        let research_questions = append_research_questions(&generated, &config.additional_research_questions);
        values.set(Placeholder::ResearchQuestions, research_questions.clone());

        // 3. Three-pass critique, each pass reading the ones before it
        let three_pass_analysis = if three_pass {
            let first_prompt = self.stage_template(Stage::FirstPass)?.render(&values)?;
            let first = self
                .generate(Stage::FirstPass, first_prompt, document.content.clone(), trace)
                .await?;
            values.set(Placeholder::FirstPass, first.clone());

            let second_prompt = self.stage_template(Stage::SecondPass)?.render(&values)?;
            let second = self
                .generate(Stage::SecondPass, second_prompt, document.content.clone(), trace)
                .await?;
            values.set(Placeholder::SecondPass, second.clone());

            let third_prompt = self.stage_template(Stage::ThirdPass)?.render(&values)?;
            let third = self
                .generate(Stage::ThirdPass, third_prompt, document.content.clone(), trace)
                .await?;

            let analysis = join_three_pass(&first, &second, &third);
            values.set(Placeholder::ThreePassAnalysis, analysis.clone());
            Some(analysis)
        } else {
            None
        };

        // 4. Dialogue
        let dialogue_prompt = dialogue.render(&values)?;
        let summary = self
            .generate(Stage::Dialogue, dialogue_prompt, document.content.clone(), trace)
            .await?;
        trace.log("Done", &format!("Dialogue has {} lines", summary.lines().count()));

        Ok(TranscriptRecord {
            document: document.clone(),
            topic,
            research_questions,
            three_pass_analysis,
            summary,
        })
    }
}
