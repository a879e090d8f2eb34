//! Hierarchical directory view over record paths.
//!
//! The tree is a pure read cache: it is rebuilt lazily from the session's
//! live paths, memoized until the session invalidates it, and never feeds
//! back into the stored data. Glyphs are a presentation concern behind the
//! pluggable [`TreeStyle`] trait.

/// Glyph provider for tree rendering.
pub trait TreeStyle {
    /// Root marker, rendered on its own line above the tree.
    fn root(&self) -> &str;
    /// Branch prefix for a leaf record; `last` marks the final sibling.
    fn record(&self, last: bool) -> &str;
    /// Branch prefix for a subdirectory.
    fn directory(&self, last: bool) -> &str;
    /// Indentation continuation under a subdirectory.
    fn dir_children(&self, last: bool) -> &str;
}

/// Default box-drawing glyphs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnicodeStyle;

impl TreeStyle for UnicodeStyle {
    fn root(&self) -> &str {
        "╮"
    }

    fn record(&self, last: bool) -> &str {
        if last {
            "╰──"
        } else {
            "├──"
        }
    }

    fn directory(&self, last: bool) -> &str {
        if last {
            "╰─┬"
        } else {
            "├─┬"
        }
    }

    fn dir_children(&self, last: bool) -> &str {
        if last {
            "  "
        } else {
            "│ "
        }
    }
}

/// One directory level: subdirectories and leaf records in first-seen order.
#[derive(Debug, Default)]
struct DirNode {
    subdirs: Vec<(String, DirNode)>,
    /// Leaf name paired with the full record path, so search terms may cross
    /// directory levels (e.g. "path/record").
    records: Vec<(String, String)>,
}

impl DirNode {
    fn child(&mut self, name: &str) -> &mut DirNode {
        let at = match self.subdirs.iter().position(|(n, _)| n == name) {
            Some(at) => at,
            None => {
                self.subdirs.push((name.to_string(), DirNode::default()));
                self.subdirs.len() - 1
            }
        };
        &mut self.subdirs[at].1
    }

    fn contains(&self, term_lc: &str) -> bool {
        self.records
            .iter()
            .any(|(_, full)| full.to_lowercase().contains(term_lc))
            || self.subdirs.iter().any(|(_, dir)| dir.contains(term_lc))
    }

    fn render_into(&self, out: &mut String, term_lc: &str, style: &dyn TreeStyle, prefix: &str) {
        let subdirs: Vec<&(String, DirNode)> = self
            .subdirs
            .iter()
            .filter(|(_, dir)| dir.contains(term_lc))
            .collect();
        let records: Vec<&(String, String)> = self
            .records
            .iter()
            .filter(|(_, full)| full.to_lowercase().contains(term_lc))
            .collect();

        for (idx, (name, dir)) in subdirs.iter().enumerate() {
            let last = idx == subdirs.len() - 1 && records.is_empty();
            out.push_str(prefix);
            out.push_str(style.directory(last));
            out.push(' ');
            out.push_str(name);
            out.push_str("/\n");

            let child_prefix = format!("{prefix}{}", style.dir_children(last));
            dir.render_into(out, term_lc, style, &child_prefix);
        }
        for (idx, (leaf, _)) in records.iter().enumerate() {
            let last = idx == records.len() - 1;
            out.push_str(prefix);
            out.push_str(style.record(last));
            out.push(' ');
            out.push_str(leaf);
            out.push('\n');
        }
    }
}

/// Lazily rebuilt, memoized directory tree over live record paths.
#[derive(Debug, Default)]
pub struct PathTree {
    root: Option<DirNode>,
    rebuild_counter: u64,
}

impl PathTree {
    /// Creates an empty, invalid tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the memoized hierarchy; the next render rebuilds it.
    pub fn invalidate(&mut self) {
        self.root = None;
    }

    /// Returns true if the memoized hierarchy is current.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.root.is_some()
    }

    /// Number of rebuilds performed so far.
    #[must_use]
    pub fn rebuild_counter(&self) -> u64 {
        self.rebuild_counter
    }

    /// Rebuilds the hierarchy from `paths` unless it is already valid.
    ///
    /// Paths split on "/"; the final component is the leaf record name.
    /// Sibling order is first-seen order of the input.
    pub fn rebuild_if_invalid<'a>(&mut self, paths: impl Iterator<Item = &'a str>) {
        if self.root.is_some() {
            return;
        }

        let mut root = DirNode::default();
        for path in paths {
            let mut parts: Vec<&str> = path.split('/').collect();
            let leaf = parts.pop().unwrap_or(path);

            let mut node = &mut root;
            for part in parts {
                node = node.child(part);
            }
            node.records.push((leaf.to_string(), path.to_string()));
        }

        self.root = Some(root);
        self.rebuild_counter += 1;
    }

    /// Renders the tree, keeping only subtrees whose full paths contain
    /// `search_term` (case-insensitive). An empty term keeps everything.
    ///
    /// Subdirectories render before leaf records at every level, depth-first.
    #[must_use]
    pub fn render(&self, search_term: &str, style: &dyn TreeStyle) -> String {
        let mut out = String::from(style.root());
        out.push('\n');

        if let Some(root) = &self.root {
            root.render_into(&mut out, &search_term.to_lowercase(), style, "");
        }
        out
    }
}
