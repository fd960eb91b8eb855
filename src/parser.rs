//! Turning the model's free-text answer into an [`AnalysisResult`].
//!
//! The model is asked for labelled sections but nothing enforces that, so parsing is
//! best-effort and never fails. Parsers are swappable through [`ResponseParser`], e.g.
//! for a provider that returns structured JSON.

use lazy_regex::regex;

use crate::models::AnalysisResult;

pub trait ResponseParser: Send + Sync {
    fn parse(&self, text: &str) -> AnalysisResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    ChartType,
    Trends,
    DataPoints,
    Interpretation,
}

impl Section {
    fn index(self) -> usize {
        match self {
            Section::ChartType => 0,
            Section::Trends => 1,
            Section::DataPoints => 2,
            Section::Interpretation => 3,
        }
    }

    fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.contains("type") {
            Section::ChartType
        } else if label.contains("trend") {
            Section::Trends
        } else if label.contains("data points") || label.contains("findings") {
            Section::DataPoints
        } else {
            Section::Interpretation
        }
    }
}

/// Splits the answer on headings such as `Chart Type:`, `## Trends`, `3. **Key Data Points**:`.
///
/// Without any recognisable heading, the whole text becomes the interpretation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionParser;

impl ResponseParser for SectionParser {
    fn parse(&self, text: &str) -> AnalysisResult {
        let mut sections: [Vec<&str>; 4] = Default::default();
        let mut preamble: Vec<&str> = Vec::new();
        let mut current: Option<Section> = None;

        for line in text.lines() {
            if let Some((section, rest)) = heading(line) {
                current = Some(section);
                if !rest.is_empty() {
                    sections[section.index()].push(rest);
                }
                continue;
            }
            match current {
                Some(section) => sections[section.index()].push(line),
                None => preamble.push(line),
            }
        }

        if current.is_none() {
            return AnalysisResult {
                interpretation: text.trim().to_string(),
                ..AnalysisResult::default()
            };
        }

        let [chart_type, trends, data_points, interpretation] = sections.map(|lines| join(&lines));
        let interpretation = if interpretation.is_empty() {
            join(&preamble)
        } else {
            interpretation
        };

        AnalysisResult {
            chart_type,
            trends,
            data_points,
            interpretation,
        }
    }
}

/// Recognises a section heading line and returns any text that follows it on the same line.
fn heading(line: &str) -> Option<(Section, &str)> {
    let re = regex!(
        r"(?i)^\s*(?:#{1,6}\s*)?(?:\d+[.)]\s*)?(?:[-*•]\s+)?(?:\*\*|__)?\s*(?P<label>chart\s+type|type\s+of\s+(?:the\s+)?chart|(?:main\s+|key\s+)?trends?(?:\s+and\s+patterns)?|(?:key\s+)?data\s+points|key\s+findings|(?:clinical\s+)?interpretation|conclusion)\b\s*(?:\*\*|__)?\s*(?P<sep>[:\-–])?\s*(?:\*\*|__)?\s*(?P<rest>.*)$"
    );
    let caps = re.captures(line)?;
    let rest = caps
        .name("rest")
        .map_or("", |m| m.as_str())
        .trim()
        .trim_end_matches("**")
        .trim_end_matches("__")
        .trim();

    // "Trends are rising" is prose, not a heading
    if caps.name("sep").is_none() && !rest.is_empty() {
        return None;
    }

    let label = caps.name("label")?.as_str();
    Some((Section::from_label(label), rest))
}

fn join(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}
