//! Trie 节点
//!
//! 二叉 trie，路径为 SHA256(key) 的各个比特。树始终保持规范形态：
//! 内部节点下不会只挂一个叶子（或两个空槽），因此根哈希只取决于键值集合，
//! 与插入顺序无关。

use std::sync::LazyLock;

use alloy_primitives::B256;
use sha2::{Digest, Sha256};

use crate::utils::{key_path, path_bit};

const EMPTY_TAG: u8 = 0x00;
const LEAF_TAG: u8 = 0x01;
const INTERNAL_TAG: u8 = 0x02;

static EMPTY_HASH: LazyLock<B256> = LazyLock::new(|| {
    let mut hasher = Sha256::new();
    hasher.update([EMPTY_TAG]);
    B256::from(<[u8; 32]>::from(hasher.finalize()))
});

/// 空槽的哈希（也是空集合的根哈希）
pub fn empty_hash() -> B256 {
    *EMPTY_HASH
}

/// 叶子哈希：H(0x01 ‖ len(key) ‖ key ‖ n ‖ len(v0) ‖ v0 ‖ …)
pub fn leaf_hash(key: &[u8], values: &[Vec<u8>]) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update((key.len() as u64).to_le_bytes());
    hasher.update(key);
    hasher.update((values.len() as u64).to_le_bytes());
    for value in values {
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value);
    }
    B256::from(<[u8; 32]>::from(hasher.finalize()))
}

/// 内部节点哈希：H(0x02 ‖ left ‖ right)
pub fn internal_hash(left: &B256, right: &B256) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update([INTERNAL_TAG]);
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    B256::from(<[u8; 32]>::from(hasher.finalize()))
}

/// 叶子节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub key: Vec<u8>,
    pub path: B256,
    pub values: Vec<Vec<u8>>,
    hash: B256,
}

impl Leaf {
    pub fn new(key: Vec<u8>, values: Vec<Vec<u8>>) -> Self {
        let path = key_path(&key);
        let hash = leaf_hash(&key, &values);
        Self { key, path, values, hash }
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// 替换字段并重新计算哈希
    pub fn replace_values(&mut self, values: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let old = std::mem::replace(&mut self.values, values);
        self.hash = leaf_hash(&self.key, &self.values);
        old
    }
}

/// 内部节点（恰好两个子节点）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Internal {
    pub left: Node,
    pub right: Node,
    hash: B256,
}

impl Internal {
    pub fn new(left: Node, right: Node) -> Self {
        let hash = internal_hash(&left.hash(), &right.hash());
        Self { left, right, hash }
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn child(&self, right: bool) -> &Node {
        if right { &self.right } else { &self.left }
    }

    pub fn child_mut(&mut self, right: bool) -> &mut Node {
        if right { &mut self.right } else { &mut self.left }
    }

    pub fn sibling(&self, right: bool) -> &Node {
        self.child(!right)
    }

    /// 子节点变化后重新计算本节点哈希
    pub fn rehash(&mut self) {
        self.hash = internal_hash(&self.left.hash(), &self.right.hash());
    }
}

/// Trie 节点
///
/// `Unknown` 只出现在验证者模式：只知道哈希、不知道内容的子树。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Empty,
    Unknown(B256),
    Leaf(Leaf),
    Internal(Box<Internal>),
}

impl Node {
    /// 节点哈希，O(1)
    pub fn hash(&self) -> B256 {
        match self {
            Node::Empty => empty_hash(),
            Node::Unknown(hash) => *hash,
            Node::Leaf(leaf) => leaf.hash(),
            Node::Internal(internal) => internal.hash(),
        }
    }

    /// 由证明中的兄弟哈希构造占位节点，空哈希直接视为已知空槽
    pub fn from_hash(hash: B256) -> Self {
        if hash == empty_hash() {
            Node::Empty
        } else {
            Node::Unknown(hash)
        }
    }

    pub fn internal(left: Node, right: Node) -> Self {
        Node::Internal(Box::new(Internal::new(left, right)))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Node::Unknown(_))
    }

    /// 两个路径不同的叶子，从 `depth` 开始分叉后组成的最小子树
    pub fn split(a: Leaf, b: Leaf, depth: usize) -> Self {
        let a_right = path_bit(&a.path, depth);
        let b_right = path_bit(&b.path, depth);

        if a_right == b_right {
            let child = Node::split(a, b, depth + 1);
            if a_right {
                Node::internal(Node::Empty, child)
            } else {
                Node::internal(child, Node::Empty)
            }
        } else if a_right {
            Node::internal(Node::Leaf(b), Node::Leaf(a))
        } else {
            Node::internal(Node::Leaf(a), Node::Leaf(b))
        }
    }

    /// 是否违反规范形态（需要 `collapse`）
    pub fn needs_collapse(&self) -> bool {
        match self {
            Node::Internal(internal) => matches!(
                (&internal.left, &internal.right),
                (Node::Empty, Node::Empty)
                    | (Node::Empty, Node::Leaf(_))
                    | (Node::Leaf(_), Node::Empty)
            ),
            _ => false,
        }
    }

    /// 删除后收缩：内部节点下只剩一个叶子（另一侧为空）时，叶子上移
    pub fn collapse(self) -> Self {
        match self {
            Node::Internal(internal) => {
                let Internal { left, right, .. } = *internal;
                match (left, right) {
                    (Node::Empty, Node::Empty) => Node::Empty,
                    (Node::Empty, Node::Leaf(leaf)) | (Node::Leaf(leaf), Node::Empty) => {
                        Node::Leaf(leaf)
                    }
                    (left, right) => Node::internal(left, right),
                }
            }
            other => other,
        }
    }

    /// 统计已知叶子数
    pub fn count_leaves(&self) -> usize {
        match self {
            Node::Leaf(_) => 1,
            Node::Internal(internal) => {
                internal.left.count_leaves() + internal.right.count_leaves()
            }
            Node::Empty | Node::Unknown(_) => 0,
        }
    }

    /// 按路径顺序收集已知叶子
    pub fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf>) {
        match self {
            Node::Leaf(leaf) => out.push(leaf),
            Node::Internal(internal) => {
                internal.left.collect_leaves(out);
                internal.right.collect_leaves(out);
            }
            Node::Empty | Node::Unknown(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(key: &str) -> Leaf {
        Leaf::new(key.as_bytes().to_vec(), vec![b"v".to_vec()])
    }

    #[test]
    fn test_hash_domains_differ() {
        let zero = B256::ZERO;
        assert_ne!(empty_hash(), internal_hash(&zero, &zero));
        assert_ne!(leaf_hash(b"", &[]), empty_hash());
    }

    #[test]
    fn test_leaf_hash_is_length_prefixed() {
        // ("ab", ["c"]) 与 ("a", ["bc"]) 不能碰撞
        let a = leaf_hash(b"ab", &[b"c".to_vec()]);
        let b = leaf_hash(b"a", &[b"bc".to_vec()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_split_places_leaves_by_path() {
        let a = leaf("Key0");
        let b = leaf("Key1");
        let node = Node::split(a.clone(), b.clone(), 0);

        let mut leaves = Vec::new();
        node.collect_leaves(&mut leaves);
        assert_eq!(leaves.len(), 2);
        assert_eq!(node.count_leaves(), 2);

        // 两个叶子的相对顺序由路径决定
        let first_is_a = leaves[0].key == a.key;
        assert_eq!(first_is_a, a.path < b.path);
    }

    #[test]
    fn test_collapse_lifts_lone_leaf() {
        let a = leaf("Key0");
        let node = Node::internal(Node::Empty, Node::Leaf(a.clone()));
        assert_eq!(node.collapse(), Node::Leaf(a));

        let unknown = Node::internal(Node::Empty, Node::Unknown(B256::repeat_byte(7)));
        assert!(matches!(unknown.collapse(), Node::Internal(_)));
    }

    #[test]
    fn test_from_hash_recognizes_empty() {
        assert_eq!(Node::from_hash(empty_hash()), Node::Empty);
        assert!(Node::from_hash(B256::repeat_byte(1)).is_unknown());
    }
}
