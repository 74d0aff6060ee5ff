use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{EngineResult, Error};

/// Dataset key listing the directories searched by relative includes.
///
/// Each child's value is one directory; children are tried in order.
const LOADPATHS_KEY: &str = "hdf.loadpaths";

/// A node in the hierarchical dataset.
///
/// Every node has a terminal name, an optional string value, and ordered
/// named children. Children preserve insertion order and are unique by
/// name; setting a path that already exists replaces its value.
#[derive(Debug, Default)]
struct DataNode {
    name: String,
    value: Option<String>,
    children: IndexMap<String, DataNode>,
}

impl DataNode {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: None,
            children: IndexMap::new(),
        }
    }

    fn walk(&self, path: &str) -> Option<&Self> {
        let mut node = self;
        for segment in path.split('.') {
            node = node.children.get(segment)?;
        }
        Some(node)
    }

    fn walk_or_create(&mut self, path: &str) -> &mut Self {
        let mut node = self;
        for segment in path.split('.') {
            node = node
                .children
                .entry(segment.to_owned())
                .or_insert_with(|| Self::new(segment));
        }
        node
    }
}

/// The hierarchical data context consumed by the template engine.
///
/// Paths are dot-separated names (`user.name`, `items.0.title`). Setting a
/// value auto-creates intermediate nodes; intermediate nodes created this
/// way carry no value until one is assigned.
#[derive(Debug, Default)]
pub struct Dataset {
    root: DataNode,
}

impl Dataset {
    /// Creates an empty dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value at `path`, or `None` when the node is missing or
    /// carries no value. The empty path addresses the root.
    #[must_use]
    pub fn get_value(&self, path: &str) -> Option<&str> {
        if path.is_empty() {
            return self.root.value.as_deref();
        }
        self.root.walk(path)?.value.as_deref()
    }

    /// Whether a node exists at `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        path.is_empty() || self.root.walk(path).is_some()
    }

    /// The terminal name of the node at `path`, or `None` when missing.
    #[must_use]
    pub fn node_name(&self, path: &str) -> Option<&str> {
        self.root.walk(path).map(|node| node.name.as_str())
    }

    /// The terminal names of the children of the node at `path`, in order.
    /// Empty when the node is missing or has no children.
    #[must_use]
    pub fn child_names(&self, path: &str) -> Vec<String> {
        let node = if path.is_empty() {
            Some(&self.root)
        } else {
            self.root.walk(path)
        };
        node.map(|node| node.children.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of children of the node at `path`; 0 when missing.
    #[must_use]
    pub fn child_count(&self, path: &str) -> usize {
        let node = if path.is_empty() {
            Some(&self.root)
        } else {
            self.root.walk(path)
        };
        node.map_or(0, |node| node.children.len())
    }

    /// Sets the value at `path`, creating intermediate nodes as needed.
    pub fn set_value(&mut self, path: &str, value: impl Into<String>) -> EngineResult<()> {
        self.set_opt_value(path, Some(value.into()))
    }

    /// Sets or clears the value at `path`. `None` leaves the node in place
    /// with no value, so it is missing for lookups but keeps its children.
    pub fn set_opt_value(&mut self, path: &str, value: Option<String>) -> EngineResult<()> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(Error::assert(format!("invalid dataset path '{path}'")));
        }
        self.root.walk_or_create(path).value = value;
        Ok(())
    }

    /// Resolves `relative` against the dataset search path.
    ///
    /// Tries each directory listed under `hdf.loadpaths`, then the bare
    /// relative path. Raises `NotFound` when no candidate exists.
    pub fn search_path(&self, relative: &str) -> EngineResult<PathBuf> {
        if let Some(node) = self.root.walk(LOADPATHS_KEY) {
            for dir in node.children.values() {
                if let Some(dir) = &dir.value {
                    let candidate = Path::new(dir).join(relative);
                    if candidate.exists() {
                        return Ok(candidate);
                    }
                }
            }
        }
        let bare = PathBuf::from(relative);
        if bare.exists() {
            return Ok(bare);
        }
        Err(Error::new(
            crate::error::ErrorKind::NotFound,
            None,
            format!("Path {relative} not found"),
        ))
    }

    /// Loads dataset text into this dataset.
    ///
    /// The format is line-oriented: `name = value` assigns, `name { … }`
    /// opens a nested scope closed by `}` on its own line, and `#` starts a
    /// comment line. Names on either form may themselves be dotted paths.
    pub fn parse_text(&mut self, text: &str) -> EngineResult<()> {
        let mut scopes: Vec<String> = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line == "}" {
                if scopes.pop().is_none() {
                    return Err(Error::parse(
                        format!("[dataset:{}]", lineno + 1),
                        "Unmatched closing brace",
                    ));
                }
                continue;
            }
            if let Some(name) = line.strip_suffix('{') {
                let name = name.trim();
                if name.is_empty() {
                    return Err(Error::parse(
                        format!("[dataset:{}]", lineno + 1),
                        "Missing name before opening brace",
                    ));
                }
                scopes.push(Self::join_scope(&scopes, name));
                continue;
            }
            if let Some((name, value)) = line.split_once('=') {
                let path = Self::join_scope(&scopes, name.trim());
                self.set_value(&path, value.trim())?;
                continue;
            }
            return Err(Error::parse(
                format!("[dataset:{}]", lineno + 1),
                format!("Unparseable dataset line: {line}"),
            ));
        }
        if let Some(open) = scopes.last() {
            return Err(Error::parse("[dataset]", format!("Unclosed scope {open}")));
        }
        Ok(())
    }

    fn join_scope(scopes: &[String], name: &str) -> String {
        match scopes.last() {
            Some(scope) => format!("{scope}.{name}"),
            None => name.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut data = Dataset::new();
        data.set_value("a.b.c", "1").unwrap();
        assert_eq!(data.get_value("a.b.c"), Some("1"));
        assert_eq!(data.get_value("a.b"), None);
        assert!(data.contains("a.b"));
        assert!(!data.contains("a.x"));
    }

    #[test]
    fn replace_keeps_children() {
        let mut data = Dataset::new();
        data.set_value("a.b", "1").unwrap();
        data.set_value("a", "top").unwrap();
        assert_eq!(data.get_value("a"), Some("top"));
        assert_eq!(data.get_value("a.b"), Some("1"));
    }

    #[test]
    fn children_in_insertion_order() {
        let mut data = Dataset::new();
        data.set_value("items.z", "1").unwrap();
        data.set_value("items.a", "2").unwrap();
        data.set_value("items.m", "3").unwrap();
        assert_eq!(data.child_names("items"), vec!["z", "a", "m"]);
        assert_eq!(data.child_count("items"), 3);
        assert_eq!(data.child_count("items.z"), 0);
    }

    #[test]
    fn node_names_are_terminal() {
        let mut data = Dataset::new();
        data.set_value("x.y.z", "v").unwrap();
        assert_eq!(data.node_name("x.y.z"), Some("z"));
        assert_eq!(data.node_name("x.y"), Some("y"));
        assert_eq!(data.node_name("missing"), None);
    }

    #[test]
    fn clear_value_keeps_node() {
        let mut data = Dataset::new();
        data.set_value("a.b", "1").unwrap();
        data.set_opt_value("a.b", None).unwrap();
        assert_eq!(data.get_value("a.b"), None);
        assert!(data.contains("a.b"));
    }

    #[test]
    fn text_loader() {
        let mut data = Dataset::new();
        data.parse_text(
            "# fixture\n\
             user {\n\
               name = Ada\n\
               id = 7\n\
             }\n\
             Config.TagStart = cs\n",
        )
        .unwrap();
        assert_eq!(data.get_value("user.name"), Some("Ada"));
        assert_eq!(data.get_value("user.id"), Some("7"));
        assert_eq!(data.get_value("Config.TagStart"), Some("cs"));
    }

    #[test]
    fn text_loader_rejects_unbalanced_braces() {
        let mut data = Dataset::new();
        let err = data.parse_text("a {\n").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
        let err = data.parse_text("}\n").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }
}
