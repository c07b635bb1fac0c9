// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path resolution against the node table

use crate::error::{FsError, FsResult};
use crate::node::{Ino, Node};
use crate::types::NAME_MAX;
use std::collections::HashMap;

/// Outcome of walking a path from the root.
///
/// `parent` is the node the last component was looked up in (`None` when an
/// earlier component was missing) and `node` is what that component names.
/// The root path resolves to `(root, "", root)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Lookup<'p> {
    pub parent: Option<Ino>,
    pub name: &'p str,
    pub node: Option<Ino>,
}

/// Walk `path` from `root`, ignoring empty components.
///
/// With `ancestor` set, reaching that node before the final component means
/// the path lies inside the ancestor's subtree and resolution fails with
/// `InvalidArgument`. Reaching it on the final component is returned normally
/// so callers can recognise a path that names the ancestor itself.
pub(crate) fn resolve<'p>(
    nodes: &HashMap<Ino, Node>,
    root: Ino,
    path: &'p str,
    ancestor: Option<Ino>,
) -> FsResult<Lookup<'p>> {
    let mut lookup = Lookup {
        parent: Some(root),
        name: "",
        node: Some(root),
    };
    let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();

    while let Some(component) = components.next() {
        if component.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        lookup.parent = lookup.node;
        lookup.name = component;
        lookup.node = lookup
            .node
            .and_then(|ino| nodes.get(&ino))
            .and_then(Node::children)
            .and_then(|children| children.get(component).copied());

        if ancestor.is_some() && lookup.node == ancestor && components.peek().is_some() {
            return Err(FsError::InvalidArgument);
        }
    }
    Ok(lookup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Timespec, S_IFDIR, S_IFREG};

    // Builds / -> d(2) -> e(3), / -> f(4, regular file)
    fn create_test_tree() -> HashMap<Ino, Node> {
        let now = Timespec::default();
        let mut nodes = HashMap::new();
        let mut root = Node::new(0, 1, S_IFDIR | 0o777, 0, 0, now);
        let mut d = Node::new(0, 2, S_IFDIR | 0o777, 0, 0, now);
        let e = Node::new(0, 3, S_IFDIR | 0o777, 0, 0, now);
        let f = Node::new(0, 4, S_IFREG | 0o644, 0, 0, now);
        if let Some(children) = d.children_mut() {
            children.insert("e".to_string(), 3);
        }
        if let Some(children) = root.children_mut() {
            children.insert("d".to_string(), 2);
            children.insert("f".to_string(), 4);
        }
        for node in [root, d, e, f] {
            nodes.insert(node.ino(), node);
        }
        nodes
    }

    #[test]
    fn test_root_paths() {
        let nodes = create_test_tree();
        for path in ["", "/", "//"] {
            let lookup = resolve(&nodes, 1, path, None).expect("root resolves");
            assert_eq!(lookup, Lookup { parent: Some(1), name: "", node: Some(1) });
        }
    }

    #[test]
    fn test_redundant_slashes_are_ignored() {
        let nodes = create_test_tree();
        let lookup = resolve(&nodes, 1, "//d///e/", None).expect("resolves");
        assert_eq!(lookup, Lookup { parent: Some(2), name: "e", node: Some(3) });
    }

    #[test]
    fn test_missing_final_and_intermediate_components() {
        let nodes = create_test_tree();
        let lookup = resolve(&nodes, 1, "/d/x", None).expect("resolves");
        assert_eq!(lookup, Lookup { parent: Some(2), name: "x", node: None });

        let lookup = resolve(&nodes, 1, "/x/y", None).expect("resolves");
        assert_eq!(lookup, Lookup { parent: None, name: "y", node: None });

        // A regular file in the middle leaves the file as parent.
        let lookup = resolve(&nodes, 1, "/f/y", None).expect("resolves");
        assert_eq!(lookup, Lookup { parent: Some(4), name: "y", node: None });
    }

    #[test]
    fn test_component_length_limit() {
        let nodes = create_test_tree();
        let ok = format!("/{}", "a".repeat(NAME_MAX));
        assert!(resolve(&nodes, 1, &ok, None).is_ok());

        let too_long = format!("/{}", "a".repeat(NAME_MAX + 1));
        assert_eq!(resolve(&nodes, 1, &too_long, None), Err(FsError::NameTooLong));

        // Checked even below a missing component.
        let deep = format!("/missing/{}", "a".repeat(NAME_MAX + 1));
        assert_eq!(resolve(&nodes, 1, &deep, None), Err(FsError::NameTooLong));
    }

    #[test]
    fn test_ancestor_guard() {
        let nodes = create_test_tree();
        assert_eq!(resolve(&nodes, 1, "/d/e/f", Some(2)), Err(FsError::InvalidArgument));
        assert_eq!(resolve(&nodes, 1, "/d/new", Some(2)), Err(FsError::InvalidArgument));

        // Naming the ancestor itself is not a loop.
        let lookup = resolve(&nodes, 1, "/d", Some(2)).expect("resolves");
        assert_eq!(lookup.node, Some(2));

        let lookup = resolve(&nodes, 1, "/f", Some(2)).expect("resolves");
        assert_eq!(lookup.node, Some(4));
    }
}
