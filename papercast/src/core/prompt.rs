//! Named prompt templates with typed `<PLACEHOLDER>` substitution.
//!
//! A template is rendered against a [`PromptValues`] map. Rendering fails
//! when the template names a placeholder the crate does not know, or one that
//! has no bound value, so a new template can never leak a raw `<TOPIC>` into
//! a model call.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use crate::core::error::{PapercastError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placeholder {
    EpisodeNumber,
    BackgroundKnowledge,
    Title,
    Abstract,
    Authors,
    Topic,
    ResearchQuestions,
    ThreePassAnalysis,
    OriginalContent,
    FirstPass,
    SecondPass,
}

impl Placeholder {
    pub const ALL: [Placeholder; 11] = [
        Placeholder::EpisodeNumber,
        Placeholder::BackgroundKnowledge,
        Placeholder::Title,
        Placeholder::Abstract,
        Placeholder::Authors,
        Placeholder::Topic,
        Placeholder::ResearchQuestions,
        Placeholder::ThreePassAnalysis,
        Placeholder::OriginalContent,
        Placeholder::FirstPass,
        Placeholder::SecondPass,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Placeholder::EpisodeNumber => "EPISODE_NUMBER",
            Placeholder::BackgroundKnowledge => "BACKGROUND_KNOWLEDGE",
            Placeholder::Title => "TITLE",
            Placeholder::Abstract => "ABSTRACT",
            Placeholder::Authors => "AUTHORS",
            Placeholder::Topic => "TOPIC",
            Placeholder::ResearchQuestions => "RESEARCH_QUESTIONS",
            Placeholder::ThreePassAnalysis => "THREE_PASS_ANALYSIS",
            Placeholder::OriginalContent => "ORIGINAL_CONTENT",
            Placeholder::FirstPass => "FIRST_PASS",
            Placeholder::SecondPass => "SECOND_PASS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.name())
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<([A-Z][A-Z0-9_]*)>").expect("valid placeholder regex"))
}

/// Values bound so far in one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PromptValues {
    values: HashMap<Placeholder, String>,
}

impl PromptValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, placeholder: Placeholder, value: impl Into<String>) -> &mut Self {
        self.values.insert(placeholder, value.into());
        self
    }

    pub fn with(mut self, placeholder: Placeholder, value: impl Into<String>) -> Self {
        self.set(placeholder, value);
        self
    }

    pub fn get(&self, placeholder: Placeholder) -> Option<&str> {
        self.values.get(&placeholder).map(String::as_str)
    }

    pub fn contains(&self, placeholder: Placeholder) -> bool {
        self.values.contains_key(&placeholder)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    name: String,
    body: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholders referenced by the template body. Unknown names are an error.
    pub fn placeholders(&self) -> Result<BTreeSet<Placeholder>> {
        let mut found = BTreeSet::new();
        let mut unknown = Vec::new();
        for caps in placeholder_pattern().captures_iter(&self.body) {
            match Placeholder::from_name(&caps[1]) {
                Some(p) => {
                    found.insert(p);
                }
                None => unknown.push(format!("<{}>", &caps[1])),
            }
        }
        if !unknown.is_empty() {
            return Err(PapercastError::template(
                &self.name,
                format!("unknown placeholders {}", unknown.join(", ")),
            ));
        }
        Ok(found)
    }

    pub fn uses(&self, placeholder: Placeholder) -> bool {
        self.body.contains(&placeholder.to_string())
    }

    /// Check that every placeholder in the body is in `available`.
    pub fn check_resolvable(&self, available: &BTreeSet<Placeholder>) -> Result<()> {
        let missing: Vec<String> = self
            .placeholders()?
            .difference(available)
            .map(|p| p.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PapercastError::template(
                &self.name,
                format!("placeholders cannot be resolved: {}", missing.join(", ")),
            ))
        }
    }

    /// Substitute every placeholder in one pass. Substituted text is not
    /// rescanned, so values may safely contain `<...>` sequences.
    pub fn render(&self, values: &PromptValues) -> Result<String> {
        let bound: BTreeSet<Placeholder> = Placeholder::ALL
            .into_iter()
            .filter(|p| values.contains(*p))
            .collect();
        self.check_resolvable(&bound)?;

        let rendered = placeholder_pattern().replace_all(&self.body, |caps: &regex::Captures| {
            Placeholder::from_name(&caps[1])
                .and_then(|p| values.get(p))
                .unwrap_or_default()
                .to_string()
        });
        Ok(rendered.into_owned())
    }
}

/// Prompt library loaded from a TOML table of `name = "template"` entries.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    templates: BTreeMap<String, PromptTemplate>,
}

impl PromptLibrary {
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, String> = toml::from_str(content)?;
        let mut library = Self::default();
        for (name, body) in raw {
            let template = PromptTemplate::new(name.clone(), body);
            template.placeholders()?;
            library.templates.insert(name, template);
        }
        Ok(library)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn insert(&mut self, template: PromptTemplate) {
        self.templates.insert(template.name().to_string(), template);
    }

    pub fn get(&self, name: &str) -> Result<&PromptTemplate> {
        self.templates.get(name).ok_or_else(|| {
            let available: Vec<&str> = self.names().collect();
            PapercastError::template(
                name,
                format!("no such template in prompt library (available: {})", available.join(", ")),
            )
        })
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}
