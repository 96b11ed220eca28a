//! Prompt assembly and draft post-processing for the content stage.

use sha2::{Digest, Sha256};

use crate::domain::{BlogConfig, ResearchArtifact};

/// Length of the hex draft fingerprint
const FINGERPRINT_LEN: usize = 16;

fn style_lines(blog: &BlogConfig) -> String {
    blog.theme
        .style
        .iter()
        .map(|(key, value)| format!("- {}: {}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}

fn signal_lines(research: &ResearchArtifact) -> String {
    if research.data_points.is_empty() {
        return "(no trend data available)".to_string();
    }
    research
        .data_points
        .iter()
        .map(|p| format!("- {} ({:.2})", p.keyword, p.score))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First pass: a structured outline from the research and theme
pub fn outline_prompt(research: &ResearchArtifact, blog: &BlogConfig) -> String {
    format!(
        "You are planning an article for a blog.\n\n\
         Blog theme:\n{theme}\n\n\
         Style hints:\n{style}\n\n\
         Topic: {topic}\n\n\
         Trending signals:\n{signals}\n\n\
         Write a markdown outline: a '# ' title line, then section headings \
         with two or three bullet points each.",
        theme = blog.theme.description,
        style = style_lines(blog),
        topic = research.topic,
        signals = signal_lines(research),
    )
}

/// Second pass: refine the outline into the final draft
pub fn refine_prompt(outline: &str, research: &ResearchArtifact, blog: &BlogConfig) -> String {
    format!(
        "Turn this outline into a complete, publishable markdown article.\n\n\
         Blog theme:\n{theme}\n\n\
         Style hints:\n{style}\n\n\
         Keep the '# ' title line first. Naturally work in these keywords: {keywords}.\n\n\
         Outline:\n{outline}",
        theme = blog.theme.description,
        style = style_lines(blog),
        keywords = research.keywords().join(", "),
        outline = outline.trim(),
    )
}

/// Split a markdown draft into title and body.
///
/// Uses the first `# ` heading as the title; falls back to `fallback` and the
/// whole text when there is none.
pub fn split_title(draft: &str, fallback: &str) -> (String, String) {
    let trimmed = draft.trim();
    let mut lines = trimmed.lines();

    if let Some(first) = lines.next() {
        if let Some(title) = first.trim().strip_prefix("# ") {
            let title = title.trim();
            if !title.is_empty() {
                let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
                return (title.to_string(), body);
            }
        }
    }

    (fallback.to_string(), trimmed.to_string())
}

pub fn fingerprint(text: &str) -> String {
    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    digest[..FINGERPRINT_LEN].to_string()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
