//! Association include trees for preloading.
//!
//! An [`Include`] names one association and, optionally, associations to
//! load on the records it returns. `"comments.author"` parses into
//! `comments -> author`.

/// A path to an association to preload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    /// Association name on the parent model.
    pub name: String,
    /// Associations to load on the loaded records.
    pub children: Vec<Include>,
}

impl Include {
    /// Create an include for a single association.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Add a nested association to load.
    #[must_use]
    pub fn nest(mut self, child: impl Into<Include>) -> Self {
        merge_into(&mut self.children, child.into());
        self
    }

    /// Parse a dotted path (`"post.comments.author"`).
    ///
    /// Empty segments are skipped; an all-empty path yields `None`.
    pub fn parse(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path
            .split('.')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let (last, rest) = parts.split_last()?;
        let mut include = Include::new(*last);
        for part in rest.iter().rev() {
            include = Include::new(*part).nest(include);
        }
        Some(include)
    }
}

impl From<&str> for Include {
    fn from(path: &str) -> Self {
        Include::parse(path).unwrap_or_else(|| Include::new(path))
    }
}

impl From<String> for Include {
    fn from(path: String) -> Self {
        Include::from(path.as_str())
    }
}

/// Add `include` to `list`, merging children with an existing entry of the
/// same name instead of duplicating it.
pub fn merge_into(list: &mut Vec<Include>, include: Include) {
    if let Some(existing) = list.iter_mut().find(|i| i.name == include.name) {
        for child in include.children {
            merge_into(&mut existing.children, child);
        }
    } else {
        list.push(include);
    }
}
