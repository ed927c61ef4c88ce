//! Statutory and case reference extraction.

use std::sync::LazyLock;

use regex::Regex;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bsections?|\bsecs?\.|§)\s*(\d+(?:\.\d+)?[a-z]?(?:\([0-9a-z]+\))*(?:-\d+[a-z]?)?)")
        .expect("section pattern is valid")
});

static RULING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\brev\.?\s*(rul|proc)\.?\s*(\d{2,4}-\d+)").expect("ruling pattern is valid")
});

static PLR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bPLR\s*(\d{6,})").expect("PLR pattern is valid"));

static CASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][\w&'.]*(?:\s+[A-Z][\w&'.]*)*)\s+v\.?\s+([A-Z][\w&'.]*(?:\s+[A-Z][\w&'.]*)*)")
        .expect("case pattern is valid")
});

/// A named provision or authority mentioned in text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    Section(String),
    RevenueRuling(String),
    RevenueProcedure(String),
    PrivateLetterRuling(String),
    Case(String),
}

impl Reference {
    /// Display form, e.g. `Section 338(h)(10)` or `Rev. Rul. 2008-25`.
    pub fn label(&self) -> String {
        match self {
            Reference::Section(s) => format!("Section {}", s),
            Reference::RevenueRuling(s) => format!("Rev. Rul. {}", s),
            Reference::RevenueProcedure(s) => format!("Rev. Proc. {}", s),
            Reference::PrivateLetterRuling(s) => format!("PLR {}", s),
            Reference::Case(s) => s.clone(),
        }
    }

    /// Normalized key used to decide whether two texts cite the same authority.
    pub fn key(&self) -> String {
        self.label()
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    }
}

/// All references in `text`, in order of first appearance, without duplicates.
pub fn extract_references(text: &str) -> Vec<Reference> {
    let mut found: Vec<(usize, Reference)> = Vec::new();

    for caps in SECTION_RE.captures_iter(text) {
        if let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) {
            found.push((whole.start(), Reference::Section(number.as_str().to_lowercase())));
        }
    }
    for caps in RULING_RE.captures_iter(text) {
        if let (Some(whole), Some(kind), Some(number)) = (caps.get(0), caps.get(1), caps.get(2)) {
            let reference = if kind.as_str().eq_ignore_ascii_case("rul") {
                Reference::RevenueRuling(number.as_str().to_string())
            } else {
                Reference::RevenueProcedure(number.as_str().to_string())
            };
            found.push((whole.start(), reference));
        }
    }
    for caps in PLR_RE.captures_iter(text) {
        if let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) {
            found.push((
                whole.start(),
                Reference::PrivateLetterRuling(number.as_str().to_string()),
            ));
        }
    }
    for caps in CASE_RE.captures_iter(text) {
        if let (Some(whole), Some(left), Some(right)) = (caps.get(0), caps.get(1), caps.get(2)) {
            let left = strip_leading_function_words(left.as_str());
            if left.is_empty() {
                continue;
            }
            found.push((
                whole.start(),
                Reference::Case(format!("{} v. {}", left, right.as_str())),
            ));
        }
    }

    found.sort_by_key(|(position, _)| *position);
    let mut seen = std::collections::HashSet::new();
    found
        .into_iter()
        .filter(|(_, reference)| seen.insert(reference.key()))
        .map(|(_, reference)| reference)
        .collect()
}

/// Display labels of every reference in `text`.
pub fn extract_entities(text: &str) -> Vec<String> {
    extract_references(text).iter().map(Reference::label).collect()
}

/// Drops capitalised sentence openers ("In", "Under", "Does") from a case party.
fn strip_leading_function_words(party: &str) -> &str {
    const OPENERS: &[&str] = &[
        "In", "Under", "Does", "Did", "Do", "What", "How", "Per", "See", "Following", "After",
        "Before", "Is", "Was", "The",
    ];
    let mut rest = party.trim();
    loop {
        match rest.split_once(char::is_whitespace) {
            Some((first, tail)) if OPENERS.contains(&first) => rest = tail.trim_start(),
            _ => return rest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_sections() {
        let refs = extract_entities(
            "What are the tax implications of a Section 338(h)(10) election under § 1.338(h)(10)-1?",
        );
        assert_eq!(
            refs,
            vec!["Section 338(h)(10)", "Section 1.338(h)(10)-1"]
        );
    }

    #[test]
    fn test_extracts_rulings_and_cases() {
        let refs = extract_entities(
            "In Commissioner v. Court Holding Co. the court relied on Rev. Rul. 2008-25 and PLR 201234005",
        );
        assert_eq!(
            refs,
            vec![
                "Commissioner v. Court Holding Co.",
                "Rev. Rul. 2008-25",
                "PLR 201234005",
            ]
        );
    }

    #[test]
    fn test_deduplicates_by_key() {
        let refs = extract_references("section 1031 and Section 1031 and sec. 1031");
        assert_eq!(refs, vec![Reference::Section("1031".to_string())]);
    }

    #[test]
    fn test_no_references() {
        assert!(extract_entities("how is depreciation recaptured on sale").is_empty());
    }

    #[test]
    fn test_reference_key_ignores_case_and_spacing() {
        assert_eq!(
            Reference::Section("338(H)(10)".to_lowercase()).key(),
            "section338(h)(10)"
        );
    }
}
