//! The RLP codec for trie nodes as they are stored in a node store.
//!
//! Stored blobs are RLP lists: 2 items for leaves and extensions (hex-prefix
//! key, then value or child), 17 items for branches (16 children plus an
//! optional value). A child slot holds either the 32-byte hash of the child,
//! the child's own encoding when that encoding is under 32 bytes ("inline"),
//! or the empty string.

use bytes::Bytes;
use ethereum_types::H256;
use rlp::Rlp;
use thiserror::Error;

use crate::nibbles::{FromHexPrefixError, NibblePath};

/// A reference from a node to one of its children.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeRef {
    /// No child in this slot.
    Empty,

    /// A child stored in the node store under its Keccak-256 hash.
    Hash(H256),

    /// A child whose encoding is under 32 bytes and is embedded directly in
    /// the parent. Holds the child's raw RLP.
    Inline(Bytes),
}

/// A decoded trie node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Node {
    /// The empty trie.
    Empty,

    /// A branch node: 16 children and an optional value.
    Branch {
        /// One child slot per next-nibble.
        children: Box<[NodeRef; 16]>,
        /// The payload of a key that ends exactly at this branch.
        value: Option<Bytes>,
    },

    /// An extension node: a shared run of nibbles and a single child.
    Extension {
        /// The nibbles this extension consumes. Never terminated.
        path: NibblePath,
        /// The extension's only child.
        child: NodeRef,
    },

    /// A leaf node: the remaining key nibbles and a value.
    Leaf {
        /// The remaining nibbles of the key, terminator included.
        path: NibblePath,
        /// The payload of this leaf.
        value: Bytes,
    },
}

/// An error encountered when decoding a stored blob into a [`Node`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum NodeDecodeError {
    /// The blob is not well-formed RLP.
    #[error("invalid rlp in trie node: {0}")]
    Rlp(#[from] rlp::DecoderError),

    /// The blob is a list of a length no trie node has.
    #[error("trie node is a {0}-item list; expected 2 or 17")]
    UnexpectedShape(usize),

    /// The key of a leaf or extension did not decode.
    #[error(transparent)]
    HexPrefix(#[from] FromHexPrefixError),

    /// A child slot held a string that is neither empty nor a 32-byte hash.
    #[error("trie node child is a {0}-byte string; expected 0 or 32")]
    BadChildReference(usize),

    /// A two-item node without a terminator (an extension) had an empty
    /// child slot.
    #[error("extension node with an empty child")]
    EmptyExtensionChild,
}

/// Decodes the RLP encoding of a stored trie node.
pub fn decode_node(blob: &[u8]) -> Result<Node, NodeDecodeError> {
    let rlp = Rlp::new(blob);

    if rlp.is_data() && rlp.data()?.is_empty() {
        return Ok(Node::Empty);
    }

    match rlp.item_count()? {
        2 => {
            let path = NibblePath::from_hex_prefix(rlp.at(0)?.data()?)?;
            match path.has_terminator() {
                true => Ok(Node::Leaf {
                    path,
                    value: Bytes::copy_from_slice(rlp.at(1)?.data()?),
                }),
                false => {
                    let child = decode_ref(&rlp.at(1)?)?;
                    if child == NodeRef::Empty {
                        return Err(NodeDecodeError::EmptyExtensionChild);
                    }
                    Ok(Node::Extension { path, child })
                }
            }
        }
        17 => {
            let mut children: [NodeRef; 16] = Default::default();
            for (i, slot) in children.iter_mut().enumerate() {
                *slot = decode_ref(&rlp.at(i)?)?;
            }

            let value = rlp.at(16)?.data()?;
            let value = match value.is_empty() {
                true => None,
                false => Some(Bytes::copy_from_slice(value)),
            };

            Ok(Node::Branch {
                children: Box::new(children),
                value,
            })
        }
        n => Err(NodeDecodeError::UnexpectedShape(n)),
    }
}

fn decode_ref(rlp: &Rlp<'_>) -> Result<NodeRef, NodeDecodeError> {
    if rlp.is_list() {
        // An embedded child; its encoding is under 32 bytes.
        return Ok(NodeRef::Inline(Bytes::copy_from_slice(rlp.as_raw())));
    }

    let data = rlp.data()?;
    match data.len() {
        0 => Ok(NodeRef::Empty),
        32 => Ok(NodeRef::Hash(H256::from_slice(data))),
        n => Err(NodeDecodeError::BadChildReference(n)),
    }
}

impl Default for NodeRef {
    fn default() -> Self {
        Self::Empty
    }
}

#[cfg(test)]
mod tests {
    use rlp::RlpStream;

    use super::*;
    use crate::nibbles::TERMINATOR;

    #[test]
    fn decodes_a_leaf() {
        let mut stream = RlpStream::new_list(2);
        stream.append(&[0x20u8, 0x12, 0x34].as_slice());
        stream.append(&[0xdeu8, 0xad].as_slice());

        let node = decode_node(&stream.out()).unwrap();
        assert_eq!(
            node,
            Node::Leaf {
                path: NibblePath::from_nibbles(&[0x1, 0x2, 0x3, 0x4, TERMINATOR]),
                value: Bytes::from_static(&[0xde, 0xad]),
            }
        );
    }

    #[test]
    fn decodes_an_extension_with_a_hashed_child() {
        let child_hash = H256::repeat_byte(0xcc);

        let mut stream = RlpStream::new_list(2);
        stream.append(&[0x11u8, 0xab].as_slice());
        stream.append(&child_hash.as_bytes());

        let node = decode_node(&stream.out()).unwrap();
        assert_eq!(
            node,
            Node::Extension {
                path: NibblePath::from_nibbles(&[0x1, 0xa, 0xb]),
                child: NodeRef::Hash(child_hash),
            }
        );
    }

    #[test]
    fn decodes_a_branch_with_an_inline_child() {
        let mut inline = RlpStream::new_list(2);
        inline.append(&[0x30u8].as_slice());
        inline.append(&[0x01u8].as_slice());
        let inline = inline.out();

        let mut stream = RlpStream::new_list(17);
        stream.append_raw(&inline, 1);
        for _ in 1..16 {
            stream.append_empty_data();
        }
        stream.append_empty_data();

        match decode_node(&stream.out()).unwrap() {
            Node::Branch { children, value } => {
                assert_eq!(
                    children[0],
                    NodeRef::Inline(Bytes::copy_from_slice(&inline))
                );
                assert!(children[1..].iter().all(|c| *c == NodeRef::Empty));
                assert_eq!(value, None);
            }
            other => panic!("expected a branch, got {other:?}"),
        }
    }

    #[test]
    fn decodes_the_empty_node() {
        assert_eq!(decode_node(&rlp::NULL_RLP).unwrap(), Node::Empty);
    }

    #[test]
    fn rejects_bad_shapes() {
        let mut stream = RlpStream::new_list(3);
        for _ in 0..3 {
            stream.append_empty_data();
        }

        assert_eq!(
            decode_node(&stream.out()),
            Err(NodeDecodeError::UnexpectedShape(3))
        );
    }

    #[test]
    fn rejects_bad_child_references() {
        let mut stream = RlpStream::new_list(2);
        stream.append(&[0x11u8, 0xab].as_slice());
        stream.append(&[0xaau8, 0xbb, 0xcc].as_slice());

        assert_eq!(
            decode_node(&stream.out()),
            Err(NodeDecodeError::BadChildReference(3))
        );
    }
}
