//! Normalization of decoder listing output
//!
//! Each host program prints its table of contents differently. A [`Listing`]
//! keeps the raw text and parses it lazily into [`ListedEntry`] values.

/// Shape of a decoder's listing output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStyle {
    /// One entry per line, directories end with `/` (`tar -t`, `unzip -Z1`)
    PerLine,
    /// `7z l -slt` technical listing: `Key = Value` blocks separated by blank lines
    SevenZipTechnical,
}

/// One archive member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListedEntry<'a> {
    pub name: &'a str,
    pub is_dir: bool,
}

/// Raw listing text from one decoder invocation
#[derive(Debug, Clone)]
pub struct Listing {
    output: String,
    style: ListingStyle,
}

impl Listing {
    pub fn new(output: impl Into<String>, style: ListingStyle) -> Self {
        Self {
            output: output.into(),
            style,
        }
    }

    /// Iterate entries; parsing happens as the iterator advances
    pub fn entries(&self) -> Box<dyn Iterator<Item = ListedEntry<'_>> + '_> {
        match self.style {
            ListingStyle::PerLine => Box::new(per_line_entries(&self.output)),
            ListingStyle::SevenZipTechnical => Box::new(seven_zip_entries(&self.output)),
        }
    }

    /// Entry names, directories included
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries().map(|e| e.name)
    }

    pub fn file_count(&self) -> usize {
        self.entries().filter(|e| !e.is_dir).count()
    }
}

fn per_line_entries(output: &str) -> impl Iterator<Item = ListedEntry<'_>> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| ListedEntry {
            name: line,
            is_dir: line.ends_with('/'),
        })
}

fn seven_zip_entries(output: &str) -> impl Iterator<Item = ListedEntry<'_>> {
    // Everything before the dashed separator describes the archive itself
    let body = output
        .split_once("\n----------")
        .map(|(_, rest)| rest)
        .unwrap_or("");

    body.split("\n\n").filter_map(|block| {
        let mut name = None;
        let mut is_dir = false;
        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(value) = line.strip_prefix("Path = ") {
                name = Some(value);
            } else if let Some(value) = line.strip_prefix("Folder = ") {
                is_dir = value.trim() == "+";
            } else if let Some(value) = line.strip_prefix("Attributes = ") {
                is_dir |= value.starts_with('D');
            }
        }
        name.map(|name| ListedEntry { name, is_dir })
    })
}
