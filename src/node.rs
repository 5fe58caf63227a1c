//! Trie nodes and the edit token that gates in-place mutation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use imbl_sized_chunks::Chunk;

use crate::{Const, ValidBranchingConstant};

/// Number of index bits consumed by one level of the tree.
pub(crate) fn bits_per_level<const N: usize>() -> usize {
    N.ilog2() as usize
}

// `std::thread::ThreadId` cannot be read as an integer on stable, so we hand
// out our own ids. Zero is reserved for the frozen state.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// The cell identifying which thread, if any, may mutate the nodes tagged
/// with it.
///
/// A transient allocates one of these when it is created and every node it
/// touches gets tagged with it. Freezing the transient zeroes the cell; a
/// frozen token never becomes live again, so nodes reachable from a
/// persistent vector stay immutable for the lifetime of all references.
pub(crate) struct EditToken {
    owner: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenState {
    OwnedByCaller,
    OwnedElsewhere,
    Frozen,
}

impl EditToken {
    pub(crate) fn for_current_thread() -> Arc<Self> {
        Arc::new(EditToken {
            owner: AtomicU64::new(current_thread_id()),
        })
    }

    pub(crate) fn state(&self) -> TokenState {
        match self.owner.load(Ordering::Acquire) {
            0 => TokenState::Frozen,
            id if id == current_thread_id() => TokenState::OwnedByCaller,
            _ => TokenState::OwnedElsewhere,
        }
    }

    /// Releases the token. The store is a release so that every mutation made
    /// under the token happens-before any read that observes it as frozen.
    pub(crate) fn freeze(&self) {
        self.owner.store(0, Ordering::Release);
    }
}

impl fmt::Debug for EditToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditToken")
            .field("owner", &self.owner.load(Ordering::Acquire))
            .finish()
    }
}

/// A node's claim on an edit token. `None` is the permanently-frozen state:
/// every node built by a persistent operation carries it.
pub(crate) type EditRef = Option<Arc<EditToken>>;

pub(crate) type Interior<T, const N: usize> = Chunk<Arc<Node<T, N>>, N>;
pub(crate) type ChunkIter<T, const N: usize> = imbl_sized_chunks::sized_chunk::Iter<T, N>;
pub(crate) type InteriorChunkIter<T, const N: usize> = ChunkIter<Arc<Node<T, N>>, N>;

// The trie only ever grows and shrinks at its right edge, so chunks are
// always left-packed and trie leaves are always full. "Slot `i` is occupied"
// is exactly `i < chunk.len()`.
#[derive(Debug, Clone)]
pub(crate) struct Node<T, const N: usize> {
    edit: EditRef,
    pub(crate) body: Body<T, N>,
}

#[derive(Debug, Clone)]
pub(crate) enum Body<T, const N: usize> {
    Leaf { data: Chunk<T, N> },
    Interior { children: Interior<T, N> },
}

impl<T, const N: usize> Node<T, N>
where
    Const<N>: ValidBranchingConstant,
{
    pub(crate) fn leaf(edit: EditRef, data: Chunk<T, N>) -> Self {
        Node {
            edit,
            body: Body::Leaf { data },
        }
    }

    pub(crate) fn interior(edit: EditRef, children: Interior<T, N>) -> Self {
        Node {
            edit,
            body: Body::Interior { children },
        }
    }

    /// A node may be mutated in place exactly when it carries the caller's
    /// live token. Token comparison is pointer identity.
    pub(crate) fn editable_by(&self, edit: &Arc<EditToken>) -> bool {
        self.edit.as_ref().is_some_and(|own| Arc::ptr_eq(own, edit))
    }

    /// Number of elements below this node. Only used by invariant checks.
    pub(crate) fn len(&self) -> usize {
        match &self.body {
            Body::Leaf { data } => data.len(),
            Body::Interior { children } => children.iter().map(|c| c.len()).sum(),
        }
    }
}

impl<T: Clone, const N: usize> Node<T, N>
where
    Const<N>: ValidBranchingConstant,
{
    pub(crate) fn frozen_clone(&self) -> Self {
        Node {
            edit: None,
            body: self.body.clone(),
        }
    }

    pub(crate) fn editable_clone(&self, edit: &Arc<EditToken>) -> Self {
        Node {
            edit: Some(edit.clone()),
            body: self.body.clone(),
        }
    }
}

/// Walks down to the leaf slice covering `index`, or hands back the tail if
/// `index` sits at or past the tail boundary.
///
/// `index` must be within the vector; the caller checks bounds.
pub(crate) fn leaf_for<'a, T, const N: usize>(
    root: Option<&'a Arc<Node<T, N>>>,
    shift: usize,
    tail: &'a Chunk<T, N>,
    tailoff: usize,
    index: usize,
) -> &'a [T]
where
    Const<N>: ValidBranchingConstant,
{
    if index >= tailoff {
        return tail;
    }
    let mut node = root.expect("index below the tail boundary requires a trie");
    let mut level = shift;
    loop {
        let Body::Interior { children } = &node.body else {
            unreachable!();
        };
        node = &children[(index >> level) & (N - 1)];
        level -= bits_per_level::<N>();
        if level == 0 {
            break;
        }
    }
    let Body::Leaf { data } = &node.body else {
        unreachable!();
    };
    data
}

/// Builds a single-branch path of depth `level / bits` ending in `node`.
pub(crate) fn new_path<T, const N: usize>(
    edit: &EditRef,
    level: usize,
    node: Arc<Node<T, N>>,
) -> Arc<Node<T, N>>
where
    Const<N>: ValidBranchingConstant,
{
    if level == 0 {
        node
    } else {
        let below = new_path(edit, level - bits_per_level::<N>(), node);
        Arc::new(Node::interior(edit.clone(), Chunk::unit(below)))
    }
}

/// Makes `node` mutable under `edit`, cloning it out of shared structure
/// first if a persistent vector may still be holding it.
pub(crate) fn ensure_editable<'a, T: Clone, const N: usize>(
    edit: &Arc<EditToken>,
    node: &'a mut Arc<Node<T, N>>,
) -> &'a mut Node<T, N>
where
    Const<N>: ValidBranchingConstant,
{
    if !node.editable_by(edit) {
        *node = Arc::new(node.editable_clone(edit));
    }
    // A node tagged with our live token is referenced only by its parent, so
    // this is a plain in-place borrow.
    Arc::make_mut(node)
}
