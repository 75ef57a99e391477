//! Deliverable detection, sanitization and at-most-once emission.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::Delimiters;

/// The deliverable found between the delimiter pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolutionArtifact {
    pub text: String,
    pub preceding_text: String,
    pub following_text: String,
    /// Set only when extracted while finalizing a cancelled session.
    pub recovered: bool,
}

#[derive(Debug, Clone)]
pub struct SolutionExtractor {
    delimiters: Delimiters,
    surfaced: Option<SolutionArtifact>,
}

impl Default for SolutionExtractor {
    fn default() -> Self {
        Self::new(Delimiters::default())
    }
}

impl SolutionExtractor {
    pub fn new(delimiters: Delimiters) -> Self {
        Self {
            delimiters,
            surfaced: None,
        }
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    pub fn surfaced(&self) -> Option<&SolutionArtifact> {
        self.surfaced.as_ref()
    }

    /// Pure extraction: first open tag, then the first close tag after it.
    /// Returns `None` when the pair is incomplete or the sanitized body is empty.
    pub fn extract(&self, content: &str) -> Option<SolutionArtifact> {
        let Delimiters { open, close } = &self.delimiters;
        if open.is_empty() || close.is_empty() {
            return None;
        }

        let start = content.find(open.as_str())?;
        let body_start = start + open.len();
        let body_len = content[body_start..].find(close.as_str())?;
        let body_end = body_start + body_len;

        build_artifact(
            &content[..start],
            &content[body_start..body_end],
            &content[body_end + close.len()..],
        )
    }

    /// Early path for a single `ai_message` chunk.
    pub fn detect_in_chunk(&mut self, content: &str) -> Option<SolutionArtifact> {
        let artifact = self.extract(content)?;
        self.surface(artifact, "chunk")
    }

    /// Early path for `final_answer`: a tagged region if present, otherwise the
    /// whole sanitized content. Content carrying only half a delimiter pair is
    /// left to the full-text rescan.
    pub fn detect_final_answer(&mut self, content: &str) -> Option<SolutionArtifact> {
        let artifact = match self.extract(content) {
            Some(artifact) => artifact,
            None if self.mentions_delimiter(content) => return None,
            None => build_artifact("", content, "")?,
        };
        self.surface(artifact, "final_answer")
    }

    fn mentions_delimiter(&self, content: &str) -> bool {
        let Delimiters { open, close } = &self.delimiters;
        (!open.is_empty() && content.contains(open.as_str()))
            || (!close.is_empty() && content.contains(close.as_str()))
    }

    /// Fallback path: rescan all chunks joined by a single newline so a pair
    /// split across chunk boundaries is still found.
    pub fn detect_in_full_text<S: AsRef<str>>(
        &mut self,
        chunks: &[S],
        recovered: bool,
    ) -> Option<SolutionArtifact> {
        if self.surfaced.is_some() {
            debug!("solution already surfaced; skipping full-text rescan");
            return None;
        }
        let joined = chunks
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");
        let mut artifact = self.extract(&joined)?;
        artifact.recovered = recovered;
        self.surface(artifact, "full_text")
    }

    fn surface(&mut self, artifact: SolutionArtifact, path: &'static str) -> Option<SolutionArtifact> {
        if let Some(previous) = &self.surfaced {
            debug!(
                path,
                identical = previous.text == artifact.text,
                "suppressed duplicate solution"
            );
            return None;
        }
        info!(path, recovered = artifact.recovered, chars = artifact.text.len(), "solution detected");
        self.surfaced = Some(artifact.clone());
        Some(artifact)
    }
}

fn build_artifact(preceding: &str, body: &str, following: &str) -> Option<SolutionArtifact> {
    let text = sanitize(body).trim().to_owned();
    if text.is_empty() {
        return None;
    }
    Some(SolutionArtifact {
        text,
        preceding_text: sanitize(preceding).trim().to_owned(),
        following_text: sanitize(following).trim().to_owned(),
        recovered: false,
    })
}

/// Drop lines that echo the agent's prompt instructions back to the user.
pub fn sanitize(text: &str) -> String {
    text.lines()
        .filter(|line| !is_leaked_instruction(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_leaked_instruction(line: &str) -> bool {
    let lower = line.trim().to_lowercase();
    (lower.contains("critical") && lower.contains("protocol"))
        || lower.starts_with("end your response with")
        || lower.contains("must end the solution block")
        || lower.starts_with("in each response, you must include")
}
