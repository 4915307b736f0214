use std::collections::BTreeMap;
use std::fmt;

/// Per-site file counts, ordered for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SiteSummary<'a> {
    /// (site, file count), most files first, ties by site name.
    pub rows: Vec<(&'a str, usize)>,
}

impl<'a> SiteSummary<'a> {
    pub fn new(site_counts: &'a BTreeMap<String, usize>) -> Self {
        let mut rows: Vec<(&str, usize)> = site_counts
            .iter()
            .map(|(site, count)| (site.as_str(), *count))
            .collect();
        // BTreeMap order already breaks ties by name; the sort is stable.
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl fmt::Display for SiteSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return writeln!(f, "Site list: no sites host available files");
        }

        let width = self
            .rows
            .iter()
            .map(|(site, _)| site.len())
            .max()
            .unwrap_or(0);

        writeln!(f, "Site list:")?;
        for (site, count) in &self.rows {
            writeln!(f, "  {:<width$}  {}", site, count, width = width)?;
        }
        Ok(())
    }
}
