//! The tree builder and ASCII printer (component F): resolves a flat map
//! of requested `name -> range` into one level of concrete nodes. No
//! transitive walking — each node's `children` map exists for shape
//! parity with a future recursive resolver but is always empty today.

use std::fmt;

use compact_str::CompactString;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::range::RequirementSet;
use crate::registry::Registry;
use crate::version::Version;

#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub name: CompactString,
    pub version: Version,
    pub tarball: CompactString,
    pub shasum: CompactString,
    pub children: FxHashMap<CompactString, DependencyNode>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyTree {
    pub children: FxHashMap<CompactString, DependencyNode>,
}

impl fmt::Display for DependencyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", render(self))
    }
}

/// 1. Warms the cache for every requested package concurrently.
/// 2. For each request, in iteration order, picks the latest version
///    satisfying its range and inserts a resolved node.
#[tracing::instrument(skip_all)]
pub async fn build_tree(
    registry: &Registry,
    requests: &IndexMap<CompactString, RequirementSet>,
) -> Result<DependencyTree> {
    registry.cache_all(requests.keys().cloned()).await?;

    let mut tree = DependencyTree::default();
    for (name, req) in requests {
        let version = registry.latest_compatible_package_version(name, req).await?;
        let record = registry.package_by_version(name, &version).await?;
        tree.children.insert(
            name.clone(),
            DependencyNode {
                name: name.clone(),
                version,
                tarball: record.dist.tarball,
                shasum: record.dist.shasum,
                children: FxHashMap::default(),
            },
        );
    }
    Ok(tree)
}

/// Emits `.` then walks children in ascending lexicographic name order:
/// `└── ` for the last sibling (indent extends by four spaces), `├── `
/// otherwise (indent extends by `│   `). Each label is `name@version`.
pub fn render(tree: &DependencyTree) -> String {
    let mut out = String::from(".\n");
    write_children(&mut out, &tree.children, "");
    out
}

fn write_children(out: &mut String, children: &FxHashMap<CompactString, DependencyNode>, indent: &str) {
    let mut names: Vec<&CompactString> = children.keys().collect();
    names.sort();

    let last_index = names.len().saturating_sub(1);
    for (i, name) in names.into_iter().enumerate() {
        let node = &children[name];
        let is_last = i == last_index;
        let (branch, extension) = if is_last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };

        out.push_str(indent);
        out.push_str(branch);
        out.push_str(&node.name);
        out.push('@');
        out.push_str(&node.version.to_string());
        out.push('\n');

        let child_indent = format!("{indent}{extension}");
        write_children(out, &node.children, &child_indent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, version: &str) -> DependencyNode {
        DependencyNode {
            name: name.into(),
            version: version.parse().unwrap(),
            tarball: "https://example.invalid/t.tgz".into(),
            shasum: "deadbeef".into(),
            children: FxHashMap::default(),
        }
    }

    #[test]
    fn prints_two_children_scenario() {
        let mut tree = DependencyTree::default();
        tree.children.insert("express".into(), leaf("express", "4.18.0"));
        tree.children.insert("grunt".into(), leaf("grunt", "1.6.1"));

        assert_eq!(
            render(&tree),
            ".\n├── express@4.18.0\n└── grunt@1.6.1\n"
        );
    }

    #[test]
    fn single_child_uses_last_sibling_branch() {
        let mut tree = DependencyTree::default();
        tree.children.insert("express".into(), leaf("express", "4.18.0"));

        assert_eq!(render(&tree), ".\n└── express@4.18.0\n");
    }

    #[test]
    fn empty_tree_prints_bare_root() {
        let tree = DependencyTree::default();
        assert_eq!(render(&tree), ".\n");
    }

    #[test]
    fn children_map_is_always_initialized_empty() {
        let node = leaf("express", "4.18.0");
        assert!(node.children.is_empty());
    }
}
