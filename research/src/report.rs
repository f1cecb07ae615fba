use crate::steps::Step;
use agent::search::SearchResult;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

static CITATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").unwrap());

/// How one subtopic's pipeline ended.
#[derive(Clone, Debug)]
pub enum SubtopicOutcome {
    Completed {
        summary: String,
        results: Vec<SearchResult>,
    },
    /// `step` is `None` when the pipeline never got to report one, e.g. its
    /// task panicked or the run was cancelled before it started.
    Failed {
        step: Option<Step>,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub title: String,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct ReportSection {
    pub title: String,
    pub body: String,
    /// Global reference numbers cited by this section.
    pub sources: Vec<usize>,
    /// Why the section could not be completed.
    pub incomplete: Option<String>,
}

/// The assembled report. Built once per run and never modified afterwards.
#[derive(Clone, Debug)]
pub struct ResearchReport {
    topic: String,
    sections: Vec<ReportSection>,
    references: Vec<Reference>,
}

#[derive(Default)]
struct ReferenceIndex {
    by_url: HashMap<String, usize>,
    references: Vec<Reference>,
}

impl ReferenceIndex {
    /// 1-based global number for `result`, deduplicated by URL.
    fn number(&mut self, result: &SearchResult) -> usize {
        if let Some(n) = self.by_url.get(&result.url) {
            return *n;
        }
        self.references.push(Reference {
            title: result.title.clone(),
            url: result.url.clone(),
        });
        let n = self.references.len();
        self.by_url.insert(result.url.clone(), n);
        n
    }
}

impl ResearchReport {
    /// Lays out sections in the given order. Inline `[n]` citations, which
    /// point into each subtopic's own results, are renumbered to the global
    /// reference list; a summary that cites nothing is credited with all of
    /// its results.
    pub fn assemble(topic: &str, outcomes: Vec<(String, SubtopicOutcome)>) -> Self {
        let mut index = ReferenceIndex::default();

        let sections = outcomes
            .into_iter()
            .map(|(title, outcome)| match outcome {
                SubtopicOutcome::Completed { summary, results } => {
                    let (body, sources) = cite(&summary, &results, &mut index);
                    ReportSection {
                        title,
                        body,
                        sources,
                        incomplete: None,
                    }
                }
                SubtopicOutcome::Failed { step, reason } => ReportSection {
                    title,
                    body: String::new(),
                    sources: vec![],
                    incomplete: Some(match step {
                        Some(step) => format!("{} step failed: {}", step, reason),
                        None => reason,
                    }),
                },
            })
            .collect();

        Self {
            topic: topic.to_string(),
            sections,
            references: index.references,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn sections(&self) -> &[ReportSection] {
        &self.sections
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn is_complete(&self) -> bool {
        self.sections.iter().all(|s| s.incomplete.is_none())
    }

    pub fn incomplete_sections(&self) -> impl Iterator<Item = &ReportSection> {
        self.sections.iter().filter(|s| s.incomplete.is_some())
    }
}

fn cite(summary: &str, results: &[SearchResult], index: &mut ReferenceIndex) -> (String, Vec<usize>) {
    let cited = CITATION
        .captures_iter(summary)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .filter(|n| (1..=results.len()).contains(n))
        .collect::<BTreeSet<_>>();

    if cited.is_empty() {
        let sources = results.iter().map(|r| index.number(r)).collect::<BTreeSet<_>>();
        let body = CITATION.replace_all(summary, "").to_string();
        return (body, sources.into_iter().collect());
    }

    let mut sources = BTreeSet::new();
    let body = CITATION.replace_all(summary, |c: &Captures| {
        match c[1].parse::<usize>() {
            Ok(n) if (1..=results.len()).contains(&n) => {
                let global = index.number(&results[n - 1]);
                sources.insert(global);
                format!("[{}]", global)
            }
            _ => String::new(),
        }
    });

    (body.to_string(), sources.into_iter().collect())
}

impl std::fmt::Display for ResearchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "# {}\n\n", self.topic)?;

        for section in &self.sections {
            write!(f, "## {}\n\n", section.title)?;

            if let Some(reason) = &section.incomplete {
                write!(
                    f,
                    "> **Incomplete:** research on this subtopic could not be completed ({}).\n\n",
                    reason
                )?;
                continue;
            }

            write!(f, "{}\n\n", section.body.trim())?;
            if !section.sources.is_empty() {
                let sources = section
                    .sources
                    .iter()
                    .map(|n| format!("[{}]", n))
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(f, "Sources: {}\n\n", sources)?;
            }
        }

        write!(f, "## References\n\n")?;
        if self.references.is_empty() {
            return writeln!(f, "No sources were found.");
        }
        for (i, reference) in self.references.iter().enumerate() {
            writeln!(f, "{}. [{}]({})", i + 1, reference.title, reference.url)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ResearchReport, SubtopicOutcome};
    use crate::steps::Step;
    use crate::testing::result_for;

    fn completed(summary: &str, queries: &[&str]) -> SubtopicOutcome {
        SubtopicOutcome::Completed {
            summary: summary.to_string(),
            results: queries.iter().map(|q| result_for(q)).collect(),
        }
    }

    #[test]
    fn test_citations_are_renumbered_globally() {
        let report = ResearchReport::assemble(
            "Renewable Energy",
            vec![
                ("Solar".to_string(), completed("Panels [2] work [1].", &["solar", "pv"])),
                ("Wind".to_string(), completed("Shared [2], own [1] [7].", &["wind", "pv"])),
            ],
        );

        let sections = report.sections();
        assert_eq!(sections[0].body, "Panels [1] work [2].");
        assert_eq!(sections[0].sources, vec![1, 2]);
        assert_eq!(sections[1].body, "Shared [1], own [3] .");
        assert_eq!(sections[1].sources, vec![1, 3]);

        let urls = report.references().iter().map(|r| r.url.as_str()).collect::<Vec<_>>();
        assert_eq!(
            urls,
            vec!["https://example.com/pv", "https://example.com/solar", "https://example.com/wind"]
        );
    }

    #[test]
    fn test_uncited_summary_credits_all_results() {
        let report = ResearchReport::assemble(
            "Renewable Energy",
            vec![("Solar".to_string(), completed("No markers here.", &["solar", "pv"]))],
        );
        assert_eq!(report.sections()[0].sources, vec![1, 2]);
        assert_eq!(report.references().len(), 2);
    }

    #[test]
    fn test_failed_subtopics_are_marked() {
        let report = ResearchReport::assemble(
            "Renewable Energy",
            vec![
                ("Solar".to_string(), completed("Sunny [1].", &["solar"])),
                (
                    "Wind".to_string(),
                    SubtopicOutcome::Failed {
                        step: Some(Step::Summarize),
                        reason: "service unavailable".to_string(),
                    },
                ),
                (
                    "Hydro".to_string(),
                    SubtopicOutcome::Failed {
                        step: None,
                        reason: "task aborted".to_string(),
                    },
                ),
            ],
        );

        assert!(!report.is_complete());
        assert_eq!(report.incomplete_sections().count(), 2);

        let text = report.to_string();
        assert!(text.starts_with("# Renewable Energy\n\n## Solar\n\nSunny [1].\n\nSources: [1]\n\n## Wind\n\n"));
        assert!(text.contains("> **Incomplete:** research on this subtopic could not be completed (summarize step failed: service unavailable)."));
        assert!(text.contains("## Hydro\n\n> **Incomplete:** research on this subtopic could not be completed (task aborted).\n\n"));
        assert!(text.ends_with("## References\n\n1. [All about solar](https://example.com/solar)\n"));
    }
}
