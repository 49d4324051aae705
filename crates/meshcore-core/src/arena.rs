//! Bounded, hierarchical memory accounting.
//!
//! Every long-lived structure in the worker is charged to an [`Arena`].
//! Arenas form a tree rooted at a single process-wide root with a fixed
//! ceiling; a child's charges count against each ancestor and against the
//! root. Blocks stay charged until their arena is freed, at which point the
//! whole subtree is released in one step.
//!
//! The ceiling is a failsafe, not a soft limit: [`Arena::allocate`] never
//! returns an error. When the ceiling would be crossed the failsafe handler
//! runs, and it cannot return.
//!
//! ```text
//! root (ceiling 4 MiB)
//! ├── angel        handshake buffer
//! ├── crypto-auth  authorized passwords
//! ├── router       node store
//! └── admin        per-request children, freed after each reply
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use thiserror::Error;

/// Process-wide allocation ceiling: 2^22 bytes (4 MiB).
pub const ALLOCATOR_FAILSAFE: usize = 1 << 22;

/// Handler invoked when the failsafe trips. It must not return.
pub type FailsafeHandler = fn(&ArenaBreach) -> !;

/// Why an allocation was refused
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArenaBreach {
    /// The root ceiling would be exceeded
    #[error(
        "allocating {requested} bytes in '{arena}' with {allocated} of {ceiling} bytes in use exceeds the ceiling"
    )]
    Ceiling {
        /// Path of the requesting arena
        arena: String,
        /// Bytes requested
        requested: usize,
        /// Bytes in use across the hierarchy
        allocated: usize,
        /// Root ceiling
        ceiling: usize,
    },

    /// The arena (or an ancestor) was already freed
    #[error("allocation from freed arena '{arena}'")]
    Freed {
        /// Path of the freed arena
        arena: String,
    },
}

fn terminate_process(breach: &ArenaBreach) -> ! {
    tracing::error!("memory failsafe tripped: {}", breach);
    std::process::exit(1)
}

struct Root {
    ceiling: usize,
    allocated: AtomicUsize,
    failsafe: FailsafeHandler,
}

struct Node {
    path: String,
    root: Arc<Root>,
    parent: Option<Arc<Node>>,
    charged: AtomicUsize,
    freed: AtomicBool,
    children: Mutex<Vec<Weak<Node>>>,
}

impl Node {
    fn mark_freed(&self) {
        self.freed.store(true, Ordering::SeqCst);
        self.charged.store(0, Ordering::SeqCst);
        let children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        for child in children.iter().filter_map(Weak::upgrade) {
            child.mark_freed();
        }
    }

    fn ancestors(&self) -> impl Iterator<Item = &Node> {
        std::iter::successors(Some(self), |node| node.parent.as_deref())
    }
}

/// A node in the allocation tree.
///
/// Dropping an arena frees it and its whole subtree.
pub struct Arena {
    node: Arc<Node>,
}

impl Arena {
    /// Create a root arena that terminates the process on breach.
    #[must_use]
    pub fn root(ceiling: usize) -> Self {
        Self::root_with_failsafe(ceiling, terminate_process)
    }

    /// Create a root arena with a custom failsafe handler.
    #[must_use]
    pub fn root_with_failsafe(ceiling: usize, failsafe: FailsafeHandler) -> Self {
        let root = Arc::new(Root {
            ceiling,
            allocated: AtomicUsize::new(0),
            failsafe,
        });
        Self {
            node: Arc::new(Node {
                path: "root".to_string(),
                root,
                parent: None,
                charged: AtomicUsize::new(0),
                freed: AtomicBool::new(false),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Carve a named child arena whose charges roll up into this one.
    #[must_use]
    pub fn child(&self, name: &str) -> Arena {
        let node = Arc::new(Node {
            path: format!("{}/{}", self.node.path, name),
            root: Arc::clone(&self.node.root),
            parent: Some(Arc::clone(&self.node)),
            charged: AtomicUsize::new(0),
            freed: AtomicBool::new(self.is_freed()),
            children: Mutex::new(Vec::new()),
        });

        let mut children = self
            .node
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&node));

        Arena { node }
    }

    /// Allocate a zero-filled block, tripping the failsafe on breach.
    pub fn allocate(&self, size: usize) -> Block {
        match self.try_allocate(size) {
            Ok(block) => block,
            Err(breach) => (self.node.root.failsafe)(&breach),
        }
    }

    /// Allocate a zero-filled block, reporting a breach instead of
    /// tripping the failsafe.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaBreach`] if the arena was freed or the root ceiling
    /// would be exceeded.
    pub fn try_allocate(&self, size: usize) -> Result<Block, ArenaBreach> {
        self.try_charge(size)?;
        Ok(Block(vec![0u8; size].into_boxed_slice()))
    }

    /// Charge `size` bytes without handing out a block.
    ///
    /// Used for structures whose storage lives in ordinary collections but
    /// must still count against the ceiling. Trips the failsafe on breach.
    pub fn charge(&self, size: usize) {
        if let Err(breach) = self.try_charge(size) {
            (self.node.root.failsafe)(&breach);
        }
    }

    /// Charge `size` bytes, reporting a breach instead of tripping the
    /// failsafe.
    ///
    /// For charges driven by a request: a request that would cross the
    /// ceiling is refused, and the process keeps running.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaBreach`] if the arena was freed or the root ceiling
    /// would be exceeded.
    pub fn try_charge(&self, size: usize) -> Result<(), ArenaBreach> {
        if self.is_freed() {
            return Err(ArenaBreach::Freed {
                arena: self.node.path.clone(),
            });
        }

        let root = &self.node.root;
        root.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_add(size).filter(|total| *total <= root.ceiling)
            })
            .map_err(|current| ArenaBreach::Ceiling {
                arena: self.node.path.clone(),
                requested: size,
                allocated: current,
                ceiling: root.ceiling,
            })?;

        for node in self.node.ancestors() {
            node.charged.fetch_add(size, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Free this arena and everything carved from it.
    ///
    /// Idempotent. Dropping the arena has the same effect.
    pub fn free(&self) {
        if self.is_freed() {
            return;
        }

        let released = self.node.charged.load(Ordering::SeqCst);
        if let Some(parent) = self.node.parent.as_deref() {
            for ancestor in parent.ancestors() {
                ancestor.charged.fetch_sub(released, Ordering::SeqCst);
            }
        }
        self.node
            .root
            .allocated
            .fetch_sub(released, Ordering::SeqCst);
        self.node.mark_freed();
    }

    /// Whether this arena (or an ancestor) has been freed.
    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.node.freed.load(Ordering::SeqCst)
    }

    /// Bytes in use across the whole hierarchy.
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.node.root.allocated.load(Ordering::SeqCst)
    }

    /// Bytes charged to this arena and its descendants.
    #[must_use]
    pub fn subtree_bytes(&self) -> usize {
        self.node.charged.load(Ordering::SeqCst)
    }

    /// The root ceiling.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.node.root.ceiling
    }

    /// Slash-separated path from the root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.node.path
    }

    /// Read-only view of the root counter.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            root: Arc::clone(&self.node.root),
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.free();
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("path", &self.node.path)
            .field("subtree_bytes", &self.subtree_bytes())
            .field("freed", &self.is_freed())
            .finish()
    }
}

/// Read-only handle on the root allocation counter.
///
/// Cannot allocate or free; used by introspection such as the `memory`
/// admin method.
#[derive(Clone)]
pub struct ArenaStats {
    root: Arc<Root>,
}

impl ArenaStats {
    /// Bytes in use across the whole hierarchy.
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.root.allocated.load(Ordering::SeqCst)
    }

    /// The root ceiling.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.root.ceiling
    }
}

/// Zero-filled memory charged to an arena.
pub struct Block(Box<[u8]>);

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({} bytes)", self.0.len())
    }
}
