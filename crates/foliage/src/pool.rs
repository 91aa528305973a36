//! Pooled instance batches keyed by geometry.
//!
//! Each geometry descriptor owns a small group of batches. Spreading a
//! capture's instances across the group keeps every individual batch update
//! cheap enough to run one (or a few) per frame.

use crate::config::{ClassificationType, GeometryDescriptor};
use crate::error::{FoliageError, Result};
use crate::transform::Transform;
use glam::DVec3;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;

/// Stable batch handle. Ids grow monotonically and are never reused, so a
/// stale id from before a rebuild can never alias a new batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch #{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchState {
    /// Live instances are current; nothing queued.
    Idle,
    PendingClear,
    /// `replace` clears the live instances before the pending ones are added.
    PendingAdd { replace: bool },
    /// Emptied by a flush and not refilled since.
    #[default]
    Cleared,
}

/// What a single flush did to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    Cleared { removed: usize },
    Added { added: usize, replaced: bool },
}

#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    descriptor: GeometryDescriptor,
    state: BatchState,
    pending: Vec<Transform>,
    instances: Vec<Transform>,
}

impl Batch {
    fn new(id: BatchId, descriptor: GeometryDescriptor) -> Self {
        Self {
            id,
            descriptor,
            state: BatchState::Cleared,
            pending: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Mesh, collision, culling and lighting settings for the renderer.
    pub fn descriptor(&self) -> &GeometryDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn pending(&self) -> &[Transform] {
        &self.pending
    }

    /// Committed transforms, relative to the capture anchor.
    pub fn instances(&self) -> &[Transform] {
        &self.instances
    }

    pub fn needs_flush(&self) -> bool {
        matches!(
            self.state,
            BatchState::PendingClear | BatchState::PendingAdd { .. }
        )
    }

    /// Commits the queued mutation. Returns `None` when nothing was queued.
    pub fn flush(&mut self) -> Option<Flush> {
        match self.state {
            BatchState::PendingClear => {
                let removed = self.instances.len();
                self.instances.clear();
                self.state = BatchState::Cleared;
                Some(Flush::Cleared { removed })
            }
            BatchState::PendingAdd { replace } => {
                if replace {
                    self.instances.clear();
                }
                let added = self.pending.len();
                self.instances.reserve(added);
                self.instances.append(&mut self.pending);
                self.state = BatchState::Idle;
                Some(Flush::Added {
                    added,
                    replaced: replace,
                })
            }
            BatchState::Idle | BatchState::Cleared => None,
        }
    }
}

/// Read-only view of which batches serve which descriptor.
#[derive(Debug, Clone, Default)]
pub struct BatchLayout {
    groups: HashMap<GeometryDescriptor, Vec<BatchId>>,
}

impl BatchLayout {
    pub fn group(&self, descriptor: &GeometryDescriptor) -> Option<&[BatchId]> {
        self.groups.get(descriptor).map(Vec::as_slice)
    }

    /// Picks the batch of `descriptor`'s group with the fewest assignments so
    /// far. Batches absent from `assignment` count as empty; ties go to the
    /// earliest created.
    pub fn select_target(
        &self,
        descriptor: &GeometryDescriptor,
        assignment: &HashMap<BatchId, usize>,
    ) -> Option<BatchId> {
        select_least_loaded(self.groups.get(descriptor)?, assignment)
    }
}

fn select_least_loaded(group: &[BatchId], assignment: &HashMap<BatchId, usize>) -> Option<BatchId> {
    let mut best: Option<(BatchId, usize)> = None;
    for &id in group {
        let count = assignment.get(&id).copied().unwrap_or(0);
        match best {
            Some((_, best_count)) if count >= best_count => {}
            _ => best = Some((id, count)),
        }
    }
    best.map(|(id, _)| id)
}

#[derive(Debug, Default)]
pub struct BatchPool {
    next_id: u64,
    /// Creation order; ids are therefore sorted.
    batches: Vec<Batch>,
    groups: HashMap<GeometryDescriptor, Vec<BatchId>>,
}

impl BatchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Destroys every batch and creates `pooled_batches_per_geometry` fresh
    /// ones for each descriptor that has a mesh. When a descriptor shows up
    /// more than once the last definition wins.
    pub fn rebuild(&mut self, classifications: &[ClassificationType]) {
        self.batches.clear();
        self.groups.clear();

        for classification in classifications {
            let count = classification.pooled_batches_per_geometry.max(1);
            for descriptor in &classification.geometries {
                if descriptor.mesh.is_none() {
                    continue;
                }
                if let Some(previous) = self.groups.remove(descriptor) {
                    self.batches.retain(|b| !previous.contains(&b.id));
                }

                let mut group = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let id = BatchId(self.next_id);
                    self.next_id += 1;
                    self.batches.push(Batch::new(id, descriptor.clone()));
                    group.push(id);
                }
                self.groups.insert(descriptor.clone(), group);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.batches.iter()
    }

    pub(crate) fn batches_mut(&mut self) -> impl Iterator<Item = &mut Batch> {
        self.batches.iter_mut()
    }

    pub fn get(&self, id: BatchId) -> Option<&Batch> {
        let idx = self.batches.binary_search_by_key(&id, |b| b.id).ok()?;
        Some(&self.batches[idx])
    }

    fn get_mut(&mut self, id: BatchId) -> Option<&mut Batch> {
        let idx = self.batches.binary_search_by_key(&id, |b| b.id).ok()?;
        Some(&mut self.batches[idx])
    }

    pub fn snapshot(&self) -> BatchLayout {
        BatchLayout {
            groups: self.groups.clone(),
        }
    }

    pub fn select_target(
        &self,
        descriptor: &GeometryDescriptor,
        assignment: &HashMap<BatchId, usize>,
    ) -> Option<BatchId> {
        select_least_loaded(self.groups.get(descriptor)?, assignment)
    }

    /// Drops anything queued and schedules every batch to be emptied.
    /// Batches that are already cleared stay cleared.
    pub fn mark_all_for_clear(&mut self) {
        for batch in &mut self.batches {
            batch.pending.clear();
            if batch.state != BatchState::Cleared {
                batch.state = BatchState::PendingClear;
            }
        }
    }

    /// Queues `transforms` for the next flush of `id`. A clear that is still
    /// queued turns into a replacing add.
    pub fn apply_pending(&mut self, id: BatchId, transforms: Vec<Transform>) -> Result<()> {
        let batch = self
            .get_mut(id)
            .ok_or(FoliageError::MissingTargetBatch(id))?;
        batch.pending.extend(transforms);
        batch.state = match batch.state {
            BatchState::PendingClear => BatchState::PendingAdd { replace: true },
            BatchState::PendingAdd { replace } => BatchState::PendingAdd { replace },
            BatchState::Idle | BatchState::Cleared => BatchState::PendingAdd { replace: false },
        };
        Ok(())
    }

    /// Like [`apply_pending`](Self::apply_pending), but the flush always drops
    /// the live instances first.
    pub fn replace_pending(&mut self, id: BatchId, transforms: Vec<Transform>) -> Result<()> {
        self.apply_pending(id, transforms)?;
        if let Some(batch) = self.get_mut(id) {
            batch.state = BatchState::PendingAdd { replace: true };
        }
        Ok(())
    }

    pub fn all_clear(&self) -> bool {
        self.batches.iter().all(|b| b.state == BatchState::Cleared)
    }

    /// Live instances across every batch.
    pub fn instance_count(&self) -> usize {
        self.batches.iter().map(|b| b.instances.len()).sum()
    }

    /// Moves every live instance by `offset` in world space. Instances are
    /// stored relative to `from` and come back relative to `to`, so this also
    /// re-parents them onto a relocated anchor.
    pub fn offset_all_instances(&mut self, offset: DVec3, from: &Transform, to: &Transform) {
        for batch in &mut self.batches {
            batch.instances.par_iter_mut().for_each(|instance| {
                let mut world = from.compose(instance);
                world.translation += offset;
                *instance = world.relative_to(to);
            });
        }
    }
}
