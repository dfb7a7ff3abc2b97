//! Triage predicates: decide whether a public CVE needs an issue filed

use crate::cve::Cve;

/// Decides whether a CVE needs an issue.
///
/// Only invoked for public CVEs. An error aborts processing of the record
/// and fails the enclosing batch.
pub trait TriagePredicate {
    fn needs_issue(&self, cve: &Cve) -> anyhow::Result<bool>;
}

impl<F> TriagePredicate for F
where
    F: Fn(&Cve) -> anyhow::Result<bool>,
{
    fn needs_issue(&self, cve: &Cve) -> anyhow::Result<bool> {
        self(cve)
    }
}

/// Flags CVEs whose references or description mention one of a set of
/// patterns (case-insensitive substring match).
#[derive(Debug, Clone)]
pub struct ReferenceTriage {
    patterns: Vec<String>,
}

impl ReferenceTriage {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        let text = text.to_ascii_lowercase();
        self.patterns.iter().any(|p| text.contains(p.as_str()))
    }
}

impl TriagePredicate for ReferenceTriage {
    fn needs_issue(&self, cve: &Cve) -> anyhow::Result<bool> {
        Ok(cve.reference_urls().any(|u| self.matches(u)) || cve.descriptions().any(|d| self.matches(d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cve(json: &str) -> Cve {
        Cve::from_json(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_reference_match() {
        let triage = ReferenceTriage::new(["golang.org"]);
        let c = cve(r#"{"CVE_data_meta": {"ID": "CVE-2021-1", "STATE": "PUBLIC"},
            "references": {"reference_data": [{"url": "https://GOLANG.org/issue/1"}]}}"#);
        assert!(triage.needs_issue(&c).unwrap());
    }

    #[test]
    fn test_description_match() {
        let triage = ReferenceTriage::new(["github.com/golang"]);
        let c = cve(r#"{"CVE_data_meta": {"ID": "CVE-2021-1", "STATE": "PUBLIC"},
            "description": {"description_data": [{"lang": "eng", "value": "bug in github.com/golang/net"}]}}"#);
        assert!(triage.needs_issue(&c).unwrap());
    }

    #[test]
    fn test_no_match_and_blank_patterns_ignored() {
        let triage = ReferenceTriage::new(["", "  ", "go.dev"]);
        let c = cve(r#"{"CVE_data_meta": {"ID": "CVE-2021-1", "STATE": "PUBLIC"},
            "references": {"reference_data": [{"url": "https://example.com"}]}}"#);
        assert!(!triage.needs_issue(&c).unwrap());
    }

    #[test]
    fn test_closure_is_a_predicate() {
        let always = |_: &Cve| -> anyhow::Result<bool> { Ok(true) };
        let c = cve(r#"{"CVE_data_meta": {"ID": "CVE-2021-1", "STATE": "PUBLIC"}}"#);
        assert!(always.needs_issue(&c).unwrap());
    }
}
