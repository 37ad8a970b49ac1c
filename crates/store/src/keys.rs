//! Key layout
//!
//! All per-tree records are prefixed with the 16 raw bytes of the tree id,
//! so a tree's records form one contiguous range.

use annexstat_core::{ContentKey, RepoPath, TreeId};

pub const TREE_PREFIX_LEN: usize = 16;

/// `tree ++ path`
pub fn status_key(tree: TreeId, path: &RepoPath) -> Vec<u8> {
    let mut key = Vec::with_capacity(TREE_PREFIX_LEN + path.as_str().len());
    key.extend_from_slice(tree.as_bytes());
    key.extend_from_slice(path.as_str().as_bytes());
    key
}

/// `tree ++ key ++ 0x00 ++ path`
pub fn content_index_key(tree: TreeId, content: &ContentKey, path: &RepoPath) -> Vec<u8> {
    let mut key = content_index_prefix(tree, content);
    key.extend_from_slice(path.as_str().as_bytes());
    key
}

/// Prefix covering every path that carries `content`
pub fn content_index_prefix(tree: TreeId, content: &ContentKey) -> Vec<u8> {
    let mut key = Vec::with_capacity(TREE_PREFIX_LEN + content.as_str().len() + 1);
    key.extend_from_slice(tree.as_bytes());
    key.extend_from_slice(content.as_str().as_bytes());
    key.push(0);
    key
}

pub fn tree_prefix(tree: TreeId) -> [u8; TREE_PREFIX_LEN] {
    *tree.as_bytes()
}

/// Path component of a status or content-index key
pub fn path_from_suffix(suffix: &[u8]) -> Option<RepoPath> {
    std::str::from_utf8(suffix)
        .ok()
        .and_then(|s| RepoPath::new(s).ok())
}
