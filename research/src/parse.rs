//! Recovery of structured lists from free-form completions.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s+(.+?)\s*$").unwrap());
static DASH_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*- (.+?)\s*$").unwrap());
static NUMBERING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:[*•]|\d+[.)])\s+").unwrap());

/// Structured breakdown answer requested from the model.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SubtopicList {
    /// Focused subtopics in presentation order.
    pub subtopics: Vec<String>,
}

/// Subtopics from a breakdown answer, tried in order: a JSON object, `**bold**`
/// markers, then bulleted or numbered lines. At most `max` are returned.
pub fn parse_subtopics(text: &str, max: usize) -> Vec<String> {
    let candidates = json_subtopics(text)
        .filter(|list| !list.is_empty())
        .or_else(|| non_empty(captures(&BOLD, text)))
        .or_else(|| non_empty(captures(&LIST_ITEM, text)))
        .unwrap_or_default();

    let mut items = dedup(candidates);
    items.truncate(max);
    items
}

/// Keywords from an expansion answer: dash-prefixed lines, or failing that
/// every non-empty line that is not a heading.
pub fn parse_keywords(text: &str) -> Vec<String> {
    let dashed = captures(&DASH_ITEM, text);
    if !dashed.is_empty() {
        return dedup(dashed);
    }

    dedup(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| NUMBERING.replace(line, "").to_string())
            .collect(),
    )
}

fn json_subtopics(text: &str) -> Option<Vec<String>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<SubtopicList>(&text[start..=end])
        .ok()
        .map(|list| list.subtopics)
}

fn captures(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn non_empty(items: Vec<String>) -> Option<Vec<String>> {
    let items = dedup(items);
    (!items.is_empty()).then_some(items)
}

fn clean(item: &str) -> String {
    item.trim()
        .trim_matches(|c| c == '*' || c == '"' || c == '`')
        .trim_end_matches(':')
        .trim()
        .to_string()
}

/// Cleans items and drops empty and case-insensitive duplicates, keeping order.
fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .map(|item| clean(item))
        .filter(|item| !item.is_empty() && seen.insert(item.to_lowercase()))
        .collect()
}
