//! Nested folder structure built from flat repository paths.
//!
//! ```rust
//! use code_sage_core::tree::build_folder_structure;
//!
//! let tree = build_folder_structure(["src/main.rs", "src/lib.rs", "README.md"]);
//! let json = serde_json::to_value(&tree).unwrap();
//! assert_eq!(json["src"]["main.rs"], "file");
//! assert_eq!(json["README.md"], "file");
//! ```

use serde::Serialize;
use std::collections::BTreeMap;

/// A directory entry: either a file leaf or a sub-directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FolderNode {
    File(FileMarker),
    Dir(BTreeMap<String, FolderNode>),
}

/// Serializes as the string `"file"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMarker {
    File,
}

impl FolderNode {
    fn empty_dir() -> Self {
        FolderNode::Dir(BTreeMap::new())
    }

    /// Number of file leaves below this node.
    pub fn file_count(&self) -> usize {
        match self {
            FolderNode::File(_) => 1,
            FolderNode::Dir(children) => children.values().map(FolderNode::file_count).sum(),
        }
    }

    /// Render as an indented listing, directories suffixed with `/`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(0, &mut out);
        out
    }

    fn render_into(&self, depth: usize, out: &mut String) {
        if let FolderNode::Dir(children) = self {
            for (name, child) in children {
                out.push_str(&"  ".repeat(depth));
                out.push_str(name);
                if matches!(child, FolderNode::Dir(_)) {
                    out.push('/');
                }
                out.push('\n');
                child.render_into(depth + 1, out);
            }
        }
    }
}

/// Build a nested tree from `/`-separated paths.
///
/// A path that names both a file and a directory prefix of another path
/// resolves to the directory.
pub fn build_folder_structure<I, P>(paths: I) -> FolderNode
where
    I: IntoIterator<Item = P>,
    P: AsRef<str>,
{
    let mut root = FolderNode::empty_dir();

    for path in paths {
        let parts: Vec<&str> = path.as_ref().split('/').filter(|p| !p.is_empty()).collect();
        let Some((file, dirs)) = parts.split_last() else {
            continue;
        };

        let mut level = &mut root;
        for dir in dirs {
            let FolderNode::Dir(children) = level else {
                unreachable!("levels are always directories");
            };
            let entry = children
                .entry((*dir).to_string())
                .or_insert_with(FolderNode::empty_dir);
            if matches!(entry, FolderNode::File(_)) {
                *entry = FolderNode::empty_dir();
            }
            level = entry;
        }

        if let FolderNode::Dir(children) = level {
            children
                .entry((*file).to_string())
                .or_insert(FolderNode::File(FileMarker::File));
        }
    }

    root
}
