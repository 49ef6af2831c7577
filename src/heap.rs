//! A tracing collector that drives cleaners.
//!
//! [`TrackedHeap`] is a small object graph on a `gc-arena` arena. Objects
//! are rooted when allocated, can reference each other, and are freed by
//! [`TrackedHeap::collect`]. Objects that own a [`Cleaner`] have it handed to
//! the heap's [`CollectorHook`] once a collection finds them unreachable.
//!
//! The arena is not `Send`; a heap stays on the thread that built it, but the
//! cleaners it owns may have been created anywhere.
use crate::{
    cleaner::Cleaner,
    collector::{CollectorHook, UnreachableEvent},
};
use gc_arena::{lock::RefLock, Arena, Collect, Gc, GcWeak, Rootable};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};
use tracing::debug;

/// Identity of an object in a [`TrackedHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Collect)]
#[collect(require_static)]
pub struct ObjectId(u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

type NodeRef<'gc> = Gc<'gc, RefLock<Node<'gc>>>;

#[derive(Collect)]
#[collect(no_drop)]
struct Node<'gc> {
    edges: Vec<NodeRef<'gc>>,
}

#[derive(Collect)]
#[collect(no_drop)]
struct HeapRoot<'gc> {
    /// Mutator roots.
    roots: BTreeMap<ObjectId, NodeRef<'gc>>,
    /// Every object not yet collected. Weak, so it never keeps one alive.
    registry: BTreeMap<ObjectId, GcWeak<'gc, RefLock<Node<'gc>>>>,
}

type HeapArena = Arena<Rootable!['gc => HeapRoot<'gc>]>;

/// Dropping the heap drops the cleaners it still owns, which triggers them.
pub struct TrackedHeap {
    arena: HeapArena,
    cleaners: HashMap<ObjectId, Cleaner>,
    hook: CollectorHook,
    next_id: u64,
}

impl TrackedHeap {
    pub fn new(hook: CollectorHook) -> Self {
        Self {
            arena: HeapArena::new(|_| HeapRoot {
                roots: BTreeMap::new(),
                registry: BTreeMap::new(),
            }),
            cleaners: HashMap::new(),
            hook,
            next_id: 1,
        }
    }

    /// Allocates a rooted object owning `cleaner`.
    pub fn allocate(&mut self, cleaner: Cleaner) -> ObjectId {
        let id = self.allocate_plain();
        self.cleaners.insert(id, cleaner);
        id
    }

    /// Allocates a rooted object with no cleaner attached.
    pub fn allocate_plain(&mut self) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.arena.mutate_root(|mc, root| {
            let node = Gc::new(mc, RefLock::new(Node { edges: Vec::new() }));
            root.registry.insert(id, Gc::downgrade(node));
            root.roots.insert(id, node);
        });
        id
    }

    /// Removes `id` from the mutator roots. Returns whether it was rooted.
    pub fn release(&mut self, id: ObjectId) -> bool {
        self.arena.mutate_root(|_, root| root.roots.remove(&id).is_some())
    }

    /// Roots `id` again. Fails if it has already been collected.
    pub fn root(&mut self, id: ObjectId) -> bool {
        self.arena.mutate_root(|mc, root| {
            match root.registry.get(&id).and_then(|weak| weak.upgrade(mc)) {
                Some(node) => {
                    root.roots.insert(id, node);
                    true
                }
                None => false,
            }
        })
    }

    /// Makes `holder` reference `target`.
    pub fn link(&mut self, holder: ObjectId, target: ObjectId) -> bool {
        self.arena.mutate(|mc, root| {
            let lookup = |id: ObjectId| root.registry.get(&id).and_then(|weak| weak.upgrade(mc));
            match (lookup(holder), lookup(target)) {
                (Some(holder), Some(target)) => {
                    holder.borrow_mut(mc).edges.push(target);
                    true
                }
                _ => false,
            }
        })
    }

    /// Drops every reference from `holder` to `target`.
    pub fn unlink(&mut self, holder: ObjectId, target: ObjectId) -> bool {
        self.arena.mutate(|mc, root| {
            let lookup = |id: ObjectId| root.registry.get(&id).and_then(|weak| weak.upgrade(mc));
            match (lookup(holder), lookup(target)) {
                (Some(holder), Some(target)) => {
                    let mut node = holder.borrow_mut(mc);
                    let before = node.edges.len();
                    node.edges.retain(|edge| !Gc::ptr_eq(*edge, target));
                    node.edges.len() != before
                }
                _ => false,
            }
        })
    }

    /// Whether `id` has survived every collection so far. Observing this
    /// never keeps the object alive.
    pub fn is_reachable(&self, id: ObjectId) -> bool {
        self.arena.mutate(|_, root| root.registry.contains_key(&id))
    }

    /// Number of objects not yet collected.
    pub fn len(&self) -> usize {
        self.arena.mutate(|_, root| root.registry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs a full collection and hands the cleaners of every unreachable
    /// object to the hook, in allocation order. Returns how many were
    /// delivered.
    pub fn collect(&mut self) -> usize {
        let mut dead = Vec::new();

        let mut marked = None;
        while marked.is_none() {
            marked = self.arena.mark_all();
        }
        if let Some(marked) = marked {
            marked.finalize(|fc, root| {
                dead.extend(
                    root.registry
                        .iter()
                        .filter(|(_, weak)| weak.is_dead(fc))
                        .map(|(id, _)| *id),
                );
            });
        }
        self.arena.collect_all();

        if dead.is_empty() {
            return 0;
        }
        self.arena.mutate_root(|_, root| {
            for id in &dead {
                root.registry.remove(id);
            }
        });

        let events: Vec<UnreachableEvent> = dead
            .iter()
            .filter_map(|id| self.cleaners.remove(id))
            .map(UnreachableEvent::new)
            .collect();
        debug!(
            "collected {} object(s), {} with cleaners",
            dead.len(),
            events.len()
        );
        self.hook.deliver(events)
    }
}

impl fmt::Debug for TrackedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedHeap")
            .field("objects", &self.len())
            .field("cleaners", &self.cleaners.len())
            .finish()
    }
}
