//! Report synthesis: body, introduction, conclusion and final assembly

use crate::prompts::{self, render};
use stategraph_core::{ChatModel, Message, Result};

const SEPARATOR: &str = "\n\n---\n\n";
const INSIGHTS_HEADER: &str = "## Insights";
const SOURCES_MARKER: &str = "\n## Sources\n";

/// Which report part a writer node produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPart {
    Body,
    Introduction,
    Conclusion,
}

impl ReportPart {
    /// State field the part is written to
    pub fn field(self) -> &'static str {
        match self {
            Self::Body => "content",
            Self::Introduction => "introduction",
            Self::Conclusion => "conclusion",
        }
    }

    fn messages(self, topic: &str, sections: &str) -> Vec<Message> {
        match self {
            Self::Body => vec![
                Message::system(render(
                    prompts::REPORT_WRITER_INSTRUCTIONS,
                    &[("topic", topic), ("context", sections)],
                )),
                Message::human(prompts::WRITE_REPORT),
            ],
            Self::Introduction | Self::Conclusion => vec![
                Message::system(render(
                    prompts::INTRO_CONCLUSION_INSTRUCTIONS,
                    &[("topic", topic), ("sections", sections)],
                )),
                Message::human(if self == Self::Introduction {
                    prompts::WRITE_INTRODUCTION
                } else {
                    prompts::WRITE_CONCLUSION
                }),
            ],
        }
    }
}

/// Write one part of the report from the interview sections
pub async fn write_part(model: &dyn ChatModel, part: ReportPart, topic: &str, sections: &[String]) -> Result<String> {
    let sections = sections.join("\n\n");
    let reply = crate::state::generate(model, part.messages(topic, &sections)).await?;
    Ok(reply.content)
}

/// Assemble the final report.
///
/// A leading `## Insights` header is dropped from the body and a single
/// `## Sources` block is moved after the conclusion.
pub fn compose_report(introduction: &str, content: &str, conclusion: &str) -> String {
    let content = content
        .strip_prefix(INSIGHTS_HEADER)
        .map(str::trim_start)
        .unwrap_or(content);

    let (body, sources) = match content.split_once(SOURCES_MARKER) {
        Some((body, sources)) if !sources.contains(SOURCES_MARKER) => (body, Some(sources)),
        _ => (content, None),
    };

    let mut report = [introduction, body, conclusion].join(SEPARATOR);
    if let Some(sources) = sources {
        report.push_str("\n\n## Sources\n");
        report.push_str(sources);
    }
    report
}
