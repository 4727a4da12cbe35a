//! Candidate selection: staging artifacts are never candidates, and a non-empty extension
//! allow-list keeps only names ending in one of its entries (ASCII case-insensitive).

use crate::endpoint::{Endpoint, Entry};
use crate::error::OpError;

#[derive(Debug, Clone)]
pub struct Selector {
    staging_suffix: String,
    allow_list: Vec<String>,
}

impl Selector {
    pub fn new(staging_suffix: &str, allow_list: &[String]) -> Self {
        let allow_list = allow_list
            .iter()
            .map(|ext| {
                let ext = ext.trim().to_ascii_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .collect();
        Self {
            staging_suffix: staging_suffix.to_string(),
            allow_list,
        }
    }

    pub fn is_staging_artifact(&self, name: &str) -> bool {
        name.ends_with(&self.staging_suffix)
    }

    pub fn accepts(&self, name: &str) -> bool {
        if self.is_staging_artifact(name) {
            return false;
        }
        if self.allow_list.is_empty() {
            return true;
        }
        let lower = name.to_ascii_lowercase();
        self.allow_list
            .iter()
            .any(|ext| lower.len() > ext.len() && lower.ends_with(ext.as_str()))
    }

    pub fn filter(&self, entries: Vec<Entry>) -> Vec<Entry> {
        entries.into_iter().filter(|e| self.accepts(&e.name)).collect()
    }

    /// List `dir` on `side` and keep the candidates. An empty result is not an error.
    pub async fn select(&self, side: &dyn Endpoint, dir: &str) -> Result<Vec<Entry>, OpError> {
        let entries = side.list_entries(dir).await?;
        let total = entries.len();
        let candidates = self.filter(entries);
        tracing::info!(
            "{} {}: {} of {} entries selected",
            side.label(),
            dir,
            candidates.len(),
            total
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entries(names: &[&str]) -> Vec<Entry> {
        names
            .iter()
            .map(|name| Entry {
                name: name.to_string(),
                size: 1,
            })
            .collect()
    }

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn excludes_staging_artifacts() {
        let selector = Selector::new(".filepart", &[]);
        let kept = selector.filter(entries(&["a.txt", "b.txt.filepart", "c"]));
        assert_eq!(names(&kept), vec!["a.txt", "c"]);
    }

    #[test]
    fn allow_list_matches_suffix_case_insensitively() {
        let selector = Selector::new(".filepart", &[".txt".into(), "CSV".into()]);
        let kept = selector.filter(entries(&[
            "a.txt",
            "b.TXT",
            "c.csv",
            "d.json",
            "e.txt.filepart",
            ".txt",
            "ftxt",
        ]));
        assert_eq!(names(&kept), vec!["a.txt", "b.TXT", "c.csv"]);
    }

    #[test]
    fn compound_extensions() {
        let selector = Selector::new(".part", &[".tar.gz".into()]);
        assert!(selector.accepts("backup.tar.gz"));
        assert!(!selector.accepts("backup.gz"));
    }

    proptest! {
        #[test]
        fn staging_names_never_selected(base in "[a-zA-Z0-9_.]{1,12}", exts in proptest::collection::vec("[a-z]{1,4}", 0..3)) {
            let allow: Vec<String> = exts.iter().map(|e| format!(".{e}")).collect();
            let selector = Selector::new(".filepart", &allow);
            let staged = format!("{base}.filepart");
            prop_assert!(!selector.accepts(&staged));
        }

        #[test]
        fn empty_allow_list_keeps_everything_else(base in "[a-zA-Z0-9_]{1,12}") {
            let selector = Selector::new(".filepart", &[]);
            prop_assert!(selector.accepts(&base));
        }
    }
}
