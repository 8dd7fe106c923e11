use anyhow::Result;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Prompt and answer of one model call.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub prompt: String,
    pub response: String,
}

#[derive(Debug, Clone)]
pub struct TraceStep {
    pub at: chrono::DateTime<chrono::Local>,
    pub stage: String,
    pub note: String,
    pub exchange: Option<Exchange>,
}

/// Markdown report of one pipeline run: every stage, and for model calls
/// the prompt and the response.
pub struct TraceLogger {
    run_id: uuid::Uuid,
    doc_id: String,
    started: chrono::DateTime<chrono::Local>,
    steps: Vec<TraceStep>,
}

impl TraceLogger {
    pub fn new(doc_id: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            doc_id: doc_id.to_string(),
            started: chrono::Local::now(),
            steps: Vec::new(),
        }
    }

    fn push(&mut self, stage: &str, note: &str, exchange: Option<Exchange>) {
        self.steps.push(TraceStep {
            at: chrono::Local::now(),
            stage: stage.to_string(),
            note: note.to_string(),
            exchange,
        });
    }

    pub fn log(&mut self, stage: &str, note: &str) {
        log::info!("[{}] {}: {}", self.doc_id, stage, note);
        self.push(stage, note, None);
    }

    pub fn log_llm(&mut self, stage: &str, note: &str, prompt: &str, response: &str) {
        log::info!("[{}] {}: {} ({} chars)", self.doc_id, stage, note, response.len());
        let exchange = Exchange {
            prompt: prompt.to_string(),
            response: response.to_string(),
        };
        self.push(stage, note, Some(exchange));
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Transcript run {}", self.doc_id);
        let _ = writeln!(out, "- **Run**: {}", self.run_id);
        let _ = writeln!(out, "- **Started**: {}", self.started.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "- **Steps**: {}\n", self.steps.len());

        for (i, step) in self.steps.iter().enumerate() {
            let _ = writeln!(out, "## {}. {} ({})", i + 1, step.stage, step.at.format("%H:%M:%S"));
            let _ = writeln!(out, "{}", step.note);
            if let Some(exchange) = &step.exchange {
                let _ = writeln!(out, "\n**Prompt**:\n```text\n{}\n```", exchange.prompt);
                let _ = writeln!(out, "\n**Response**:\n```text\n{}\n```", exchange.response);
            }
            out.push('\n');
        }
        out
    }

    /// Write the report to `<logs_dir>/traces/trace_<time>_<doc>_<run>.md`.
    pub fn save(&self, logs_dir: &Path) -> Result<PathBuf> {
        let dir = logs_dir.join("traces");
        std::fs::create_dir_all(&dir)?;

        let run = self.run_id.simple().to_string();
        let path = dir.join(format!(
            "trace_{}_{}_{}.md",
            self.started.format("%Y%m%d_%H%M"),
            self.doc_id.replace(['/', ' '], "_"),
            &run[..8]
        ));
        std::fs::write(&path, self.render())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_markdown_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut trace = TraceLogger::new("hep-th/9901001");
        trace.log("Start", "Generating transcript");
        trace.log_llm("topic", "temperature 0.1", "Predict the topic", "String theory");

        let path = trace.save(dir.path()).unwrap();
        assert!(path.starts_with(dir.path().join("traces")));
        assert!(path.file_name().unwrap().to_string_lossy().contains("hep-th_9901001"));

        let report = std::fs::read_to_string(path).unwrap();
        assert!(report.starts_with("# Transcript run hep-th/9901001\n"));
        assert!(report.contains("## 2. topic"));
        assert!(report.contains("**Response**:\n```text\nString theory\n```"));
        assert!(report.contains("- **Steps**: 2\n"));
        let start = report.split("## 2.").next().unwrap();
        assert!(start.contains("## 1. Start"));
        assert!(!start.contains("**Prompt**"));
    }
}
