// src/scan/search.rs
//! Keyword/blacklist filter applied by search-based vendor sources.

/// Parsed search terms: every keyword must appear in a title, no blacklisted
/// term may. Terms prefixed with `-` go to the blacklist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchTerms {
    pub keywords: Vec<String>,
    pub blacklist: Vec<String>,
}

impl SearchTerms {
    pub fn parse(terms: &str) -> Self {
        let mut out = Self::default();
        for term in terms.to_lowercase().split_whitespace() {
            match term.strip_prefix('-') {
                Some("") => {}
                Some(banned) => out.blacklist.push(banned.to_string()),
                None => out.keywords.push(term.to_string()),
            }
        }
        out
    }

    /// Case-insensitive substring match.
    pub fn matches(&self, title: &str) -> bool {
        let text = title.to_lowercase();
        self.keywords.iter().all(|k| text.contains(k.as_str()))
            && !self.blacklist.iter().any(|b| text.contains(b.as_str()))
    }

    /// Keywords joined with `+`, as used in display names and search URLs.
    pub fn label(&self) -> String {
        self.keywords.join("+")
    }

    /// `Vendor[kw1+kw2]`
    pub fn display_name(&self, vendor: &str) -> String {
        format!("{vendor}[{}]", self.label())
    }
}
