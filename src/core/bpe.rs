//! Rank-ordered byte-pair merging.
//!
//! A chunk starts as one piece per byte. Each step merges the adjacent pair
//! whose concatenation has the smallest rank in the vocabulary (the leftmost
//! one if that rank occurs more than once) until no adjacent pair is a
//! vocabulary piece.
//!
//! Adjacent pieces are contiguous in the chunk, so a candidate merge is just a
//! wider slice of the input and no bytes are copied. The current partition is
//! a flat-array doubly-linked list indexed by each piece's starting byte:
//! merging unlinks the right node and only the merged node and its
//! predecessor need their pair rank recomputed.
//!
//! Short chunks find the minimum with a linear scan. Long chunks keep the
//! candidate pairs in a `BinaryHeap` keyed by `(rank, position)` with lazy
//! invalidation, which yields exactly the same merge order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::vocab::{Rank, Vocabulary};

/// Chunks with more bytes than this use the heap.
const LINEAR_SCAN_LIMIT: usize = 32;

/// No node / no mergeable pair.
const NONE: usize = usize::MAX;
const NO_MERGE: Rank = Rank::MAX;

/// One piece of the current partition.
#[derive(Clone, Copy, Debug)]
struct Node {
    start: usize,
    end: usize,
    /// Rank of this piece.
    token: Rank,
    /// Rank of this piece merged with its successor, or `NO_MERGE`.
    pair: Rank,
    prev: usize,
    next: usize,
}

/// Encode one chunk to its ranks.
pub fn byte_pair_encode(piece: &[u8], vocab: &Vocabulary) -> Vec<Rank> {
    if piece.is_empty() {
        return Vec::new();
    }
    if let Some(rank) = vocab.rank(piece) {
        return vec![rank];
    }
    let nodes = byte_pair_merge(piece, vocab);
    walk(&nodes).map(|node| node.token).collect()
}

/// Split one chunk into its final pieces.
pub fn byte_pair_split<'p>(piece: &'p [u8], vocab: &Vocabulary) -> Vec<&'p [u8]> {
    if piece.is_empty() {
        return Vec::new();
    }
    if vocab.rank(piece).is_some() {
        return vec![piece];
    }
    let nodes = byte_pair_merge(piece, vocab);
    walk(&nodes)
        .map(|node| &piece[node.start..node.end])
        .collect()
}

/// Number of tokens one chunk encodes to.
pub fn byte_pair_count(piece: &[u8], vocab: &Vocabulary) -> usize {
    match piece.len() {
        0 => 0,
        1 => 1,
        _ if vocab.rank(piece).is_some() => 1,
        _ => walk(&byte_pair_merge(piece, vocab)).count(),
    }
}

fn byte_pair_merge(piece: &[u8], vocab: &Vocabulary) -> Vec<Node> {
    let mut nodes = build_nodes(piece, vocab);
    if piece.len() <= LINEAR_SCAN_LIMIT {
        merge_linear(piece, vocab, &mut nodes);
    } else {
        merge_heap(piece, vocab, &mut nodes);
    }
    nodes
}

fn build_nodes(piece: &[u8], vocab: &Vocabulary) -> Vec<Node> {
    let n = piece.len();
    let mut nodes: Vec<Node> = piece
        .iter()
        .enumerate()
        .map(|(i, &b)| Node {
            start: i,
            end: i + 1,
            token: vocab.byte_rank(b),
            pair: NO_MERGE,
            prev: if i > 0 { i - 1 } else { NONE },
            next: if i + 1 < n { i + 1 } else { NONE },
        })
        .collect();
    for i in 0..n.saturating_sub(1) {
        nodes[i].pair = pair_rank(piece, vocab, &nodes, i);
    }
    nodes
}

#[inline]
fn pair_rank(piece: &[u8], vocab: &Vocabulary, nodes: &[Node], i: usize) -> Rank {
    match nodes[i].next {
        NONE => NO_MERGE,
        j => vocab
            .rank(&piece[nodes[i].start..nodes[j].end])
            .unwrap_or(NO_MERGE),
    }
}

/// Merge node `i` with its successor. Returns the predecessor of `i`, whose
/// pair rank changed as well.
fn merge_at(piece: &[u8], vocab: &Vocabulary, nodes: &mut [Node], i: usize) -> usize {
    let j = nodes[i].next;
    let j_next = nodes[j].next;

    nodes[i].token = nodes[i].pair;
    nodes[i].end = nodes[j].end;
    nodes[i].next = j_next;
    if j_next != NONE {
        nodes[j_next].prev = i;
    }
    nodes[j].pair = NO_MERGE;

    nodes[i].pair = pair_rank(piece, vocab, nodes, i);
    let pred = nodes[i].prev;
    if pred != NONE {
        nodes[pred].pair = pair_rank(piece, vocab, nodes, pred);
    }
    pred
}

fn merge_linear(piece: &[u8], vocab: &Vocabulary, nodes: &mut [Node]) {
    loop {
        let mut best = (NO_MERGE, NONE);
        let mut cur = 0;
        while cur != NONE {
            if nodes[cur].pair < best.0 {
                best = (nodes[cur].pair, cur);
            }
            cur = nodes[cur].next;
        }
        if best.1 == NONE {
            break;
        }
        merge_at(piece, vocab, nodes, best.1);
    }
}

fn merge_heap(piece: &[u8], vocab: &Vocabulary, nodes: &mut [Node]) {
    let mut heap: BinaryHeap<Reverse<(Rank, usize)>> = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.pair != NO_MERGE)
        .map(|(i, node)| Reverse((node.pair, i)))
        .collect();

    while let Some(Reverse((rank, i))) = heap.pop() {
        // A pair's rank changes whenever either side changes, and ranks are
        // unique per piece, so a mismatch means the entry is stale.
        if nodes[i].pair != rank {
            continue;
        }
        let pred = merge_at(piece, vocab, nodes, i);
        if nodes[i].pair != NO_MERGE {
            heap.push(Reverse((nodes[i].pair, i)));
        }
        if pred != NONE && nodes[pred].pair != NO_MERGE {
            heap.push(Reverse((nodes[pred].pair, pred)));
        }
    }
}

/// Surviving nodes in order. Node 0 is always the head.
fn walk(nodes: &[Node]) -> impl Iterator<Item = &Node> + '_ {
    let mut cur = if nodes.is_empty() { NONE } else { 0 };
    std::iter::from_fn(move || {
        if cur == NONE {
            return None;
        }
        let node = &nodes[cur];
        cur = node.next;
        Some(node)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    /// 256 single bytes at their byte value, then `merges` from rank 256 on.
    fn vocab_with(merges: &[&[u8]]) -> Vocabulary {
        let mut encoder: FxHashMap<Vec<u8>, Rank> =
            (0..=255u8).map(|b| (vec![b], b as Rank)).collect();
        for (i, piece) in merges.iter().enumerate() {
            encoder.insert(piece.to_vec(), 256 + i as Rank);
        }
        Vocabulary::new(encoder).unwrap()
    }

    fn merged(piece: &[u8], vocab: &Vocabulary, heap: bool) -> Vec<Vec<u8>> {
        let mut nodes = build_nodes(piece, vocab);
        if heap {
            merge_heap(piece, vocab, &mut nodes);
        } else {
            merge_linear(piece, vocab, &mut nodes);
        }
        walk(&nodes)
            .map(|node| piece[node.start..node.end].to_vec())
            .collect()
    }

    #[test]
    fn test_merges_by_rank_not_position() {
        // "bc" outranks "ab", so "abc" becomes "a" + "bc".
        let vocab = vocab_with(&[b"bc", b"ab"]);
        assert_eq!(byte_pair_split(b"abc", &vocab), vec![&b"a"[..], &b"bc"[..]]);
        assert_eq!(byte_pair_encode(b"abc", &vocab), vec![b'a' as Rank, 256]);
    }

    #[test]
    fn test_merges_cascade() {
        let vocab = vocab_with(&[b"he", b"ll", b"llo", b"hello"]);
        assert_eq!(byte_pair_encode(b"hello", &vocab), vec![259]);
        assert_eq!(
            byte_pair_split(b"hellohe", &vocab),
            vec![&b"hello"[..], &b"he"[..]]
        );
    }

    #[test]
    fn test_equal_ranks_merge_leftmost_first() {
        let vocab = vocab_with(&[b"aa"]);
        assert_eq!(byte_pair_split(b"aaa", &vocab), vec![&b"aa"[..], &b"a"[..]]);
        assert_eq!(
            byte_pair_split(b"aaaaa", &vocab),
            vec![&b"aa"[..], &b"aa"[..], &b"a"[..]]
        );
    }

    #[test]
    fn test_unmergeable_bytes_stay_single() {
        let vocab = vocab_with(&[b"ab"]);
        let piece = [0xffu8, 0x00, 0x80];
        assert_eq!(
            byte_pair_encode(&piece, &vocab),
            vec![0xff as Rank, 0x00, 0x80]
        );
        assert_eq!(byte_pair_count(&piece, &vocab), 3);
    }

    #[test]
    fn test_empty_and_single() {
        let vocab = vocab_with(&[]);
        assert!(byte_pair_encode(b"", &vocab).is_empty());
        assert_eq!(byte_pair_count(b"", &vocab), 0);
        assert_eq!(byte_pair_encode(b"z", &vocab), vec![b'z' as Rank]);
    }

    #[test]
    fn test_no_mergeable_pair_left() {
        let vocab = vocab_with(&[b"ab", b"bc", b"cd", b"abc", b"bcd", b"abcd", b"da"]);
        let text = b"abcdabcdbcadcbadabcabdcdabdcbabcdbdbabcadbcdabdcabdcab";
        for heap in [false, true] {
            let parts = merged(text, &vocab, heap);
            assert_eq!(parts.concat(), text.to_vec());
            for pair in parts.windows(2) {
                let candidate = [pair[0].as_slice(), pair[1].as_slice()].concat();
                assert!(vocab.rank(&candidate).is_none(), "{candidate:?} left unmerged");
            }
        }
    }

    #[test]
    fn test_heap_and_linear_agree() {
        let vocab = vocab_with(&[
            b" t", b"he", b" the", b"in", b"er", b" a", b"on", b"re", b" th", b"ing", b"at",
            b"ou", b"en", b"es", b"ed", b" w", b" s", b"is", b"or", b"an",
        ]);
        let texts: [&[u8]; 4] = [
            b"the rain in spain stays mainly on the plain, or so they say",
            b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            b"    indented    lines    are    where    whitespace    repeats",
            b"thethethethethethethethethethethethethethethethethethe",
        ];
        for text in texts {
            assert_eq!(merged(text, &vocab, false), merged(text, &vocab, true));
        }
    }

    #[test]
    fn test_long_chunk_uses_heap_path() {
        let vocab = vocab_with(&[b"ab"]);
        let text = b"ab".repeat(LINEAR_SCAN_LIMIT);
        assert_eq!(byte_pair_encode(&text, &vocab), vec![256; LINEAR_SCAN_LIMIT]);
        assert_eq!(byte_pair_count(&text, &vocab), LINEAR_SCAN_LIMIT);
    }
}
