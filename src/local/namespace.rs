//! Node Namespace
//!
//! Hierarchical, persistent node tree of the in-process coordination service.
//! Paths are absolute and '/'-separated; the root always exists.

use std::collections::BTreeSet;

use crate::error::{Error, Result};

/// Set of node paths, kept sorted so a node's descendants are contiguous
#[derive(Debug, Default)]
pub(crate) struct Namespace {
    nodes: BTreeSet<String>,
}

fn validate(path: &str) -> Result<()> {
    let valid = path == "/"
        || (path.starts_with('/')
            && !path.ends_with('/')
            && !path[1..].split('/').any(str::is_empty));

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_string()))
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

impl Namespace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn exists(&self, path: &str) -> Result<bool> {
        validate(path)?;
        Ok(path == "/" || self.nodes.contains(path))
    }

    pub(crate) fn create(&mut self, path: &str, create_parents: bool) -> Result<()> {
        validate(path)?;
        if self.exists(path)? {
            return Err(Error::NodeExists(path.to_string()));
        }

        let parent = parent_of(path);
        if !self.exists(parent)? {
            if !create_parents {
                return Err(Error::NoNode(parent.to_string()));
            }
            self.create(parent, true)?;
        }

        self.nodes.insert(path.to_string());
        Ok(())
    }

    pub(crate) fn delete(&mut self, path: &str) -> Result<()> {
        validate(path)?;
        if path == "/" {
            return Err(Error::InvalidPath(path.to_string()));
        }
        if !self.nodes.contains(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        if !self.children(path)?.is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }

        self.nodes.remove(path);
        Ok(())
    }

    /// Names of the direct children of `path`
    pub(crate) fn children(&self, path: &str) -> Result<Vec<String>> {
        validate(path)?;
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };

        Ok(self
            .nodes
            .range(prefix.clone()..)
            .take_while(|node| node.starts_with(&prefix))
            .map(|node| &node[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_with_parents() {
        let mut ns = Namespace::new();

        assert!(matches!(
            ns.create("/leader/h1:1000", false),
            Err(Error::NoNode(ref p)) if p == "/leader"
        ));

        ns.create("/leader/h1:1000", true).unwrap();
        assert!(ns.exists("/leader").unwrap());
        assert!(ns.exists("/leader/h1:1000").unwrap());
        assert!(matches!(
            ns.create("/leader/h1:1000", true),
            Err(Error::NodeExists(_))
        ));
    }

    #[test]
    fn test_delete() {
        let mut ns = Namespace::new();
        ns.create("/leader/h1:1000", true).unwrap();

        assert!(matches!(ns.delete("/leader"), Err(Error::NotEmpty(_))));
        ns.delete("/leader/h1:1000").unwrap();
        assert!(!ns.exists("/leader/h1:1000").unwrap());
        assert!(matches!(ns.delete("/leader/h1:1000"), Err(Error::NoNode(_))));
        ns.delete("/leader").unwrap();
    }

    #[test]
    fn test_children() {
        let mut ns = Namespace::new();
        ns.create("/leader/h1:1000", true).unwrap();
        ns.create("/leader/h2:1000", true).unwrap();
        ns.create("/leaders", false).unwrap();
        ns.create("/election/x", true).unwrap();

        assert_eq!(ns.children("/leader").unwrap(), vec!["h1:1000", "h2:1000"]);
        assert_eq!(
            ns.children("/").unwrap(),
            vec!["election", "leader", "leaders"]
        );
        assert!(ns.children("/leaders").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_paths() {
        let mut ns = Namespace::new();
        assert!(matches!(ns.create("leader", true), Err(Error::InvalidPath(_))));
        assert!(matches!(ns.create("/leader/", true), Err(Error::InvalidPath(_))));
        assert!(matches!(ns.exists("/a//b"), Err(Error::InvalidPath(_))));
        assert!(matches!(ns.delete("/"), Err(Error::InvalidPath(_))));
    }
}
