use crate::host::InstanceSink;
use crate::pool::{BatchPool, Flush};

/// Mutations committed by one applier pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplierPass {
    pub cleared: usize,
    pub added: usize,
    pub instances_added: usize,
}

impl ApplierPass {
    pub fn mutations(&self) -> usize {
        self.cleared + self.added
    }
}

/// Commits queued batch mutations a few at a time so no single frame pays
/// for a whole capture.
#[derive(Debug)]
pub struct Applier {
    update_after_frames: u32,
    max_per_frame: u32,
    frames_since_update: u32,
}

impl Applier {
    /// Zero for either limit behaves like one.
    pub fn new(update_after_frames: u32, max_per_frame: u32) -> Self {
        Self {
            update_after_frames: update_after_frames.max(1),
            max_per_frame: max_per_frame.max(1),
            frames_since_update: 0,
        }
    }

    /// Called once per frame. Returns `None` when this frame was not eligible.
    ///
    /// Each pass walks the pool from the first batch, so early batches are
    /// always served before later ones.
    pub fn tick(
        &mut self,
        pool: &mut BatchPool,
        building: bool,
        sink: &mut dyn InstanceSink,
    ) -> Option<ApplierPass> {
        self.frames_since_update = self.frames_since_update.saturating_add(1);
        if self.frames_since_update < self.update_after_frames || building {
            return None;
        }
        self.frames_since_update = 0;

        let mut pass = ApplierPass::default();
        for batch in pool.batches_mut() {
            if pass.mutations() >= self.max_per_frame as usize {
                break;
            }
            match batch.flush() {
                Some(Flush::Cleared { .. }) => {
                    sink.instances_cleared(batch.id());
                    pass.cleared += 1;
                }
                Some(Flush::Added { added, replaced }) => {
                    if replaced {
                        sink.instances_cleared(batch.id());
                    }
                    let live = batch.instances();
                    sink.instances_added(batch.id(), &live[live.len() - added..]);
                    pass.added += 1;
                    pass.instances_added += added;
                }
                None => {}
            }
        }

        if pass.mutations() > 0 {
            tracing::debug!(
                cleared = pass.cleared,
                added = pass.added,
                instances = pass.instances_added,
                "Applied batch updates"
            );
        }
        Some(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassificationType, GeometryDescriptor};
    use crate::host::NullSink;
    use crate::pool::{BatchId, BatchState};
    use crate::transform::Transform;

    fn pool(batches: u32) -> BatchPool {
        let mut pool = BatchPool::new();
        pool.rebuild(&[ClassificationType {
            pooled_batches_per_geometry: batches,
            geometries: vec![GeometryDescriptor::with_mesh("shrub")],
            ..Default::default()
        }]);
        pool
    }

    fn fill(pool: &mut BatchPool) {
        let ids: Vec<_> = pool.batches().map(|b| b.id()).collect();
        for id in ids {
            pool.apply_pending(id, vec![Transform::IDENTITY; 2]).unwrap();
        }
    }

    #[derive(Default)]
    struct Recorder {
        cleared: Vec<BatchId>,
        added: Vec<(BatchId, usize)>,
    }

    impl InstanceSink for Recorder {
        fn instances_cleared(&mut self, batch: BatchId) {
            self.cleared.push(batch);
        }

        fn instances_added(&mut self, batch: BatchId, transforms: &[Transform]) {
            self.added.push((batch, transforms.len()));
        }
    }

    #[test]
    fn waits_for_enough_frames() {
        let mut pool = pool(1);
        fill(&mut pool);
        let mut applier = Applier::new(3, 1);

        assert!(applier.tick(&mut pool, false, &mut NullSink).is_none());
        assert!(applier.tick(&mut pool, false, &mut NullSink).is_none());
        let pass = applier.tick(&mut pool, false, &mut NullSink).unwrap();
        assert_eq!(pass.added, 1);
        assert_eq!(pass.instances_added, 2);
        assert!(applier.tick(&mut pool, false, &mut NullSink).is_none());
    }

    #[test]
    fn never_runs_while_building() {
        let mut pool = pool(1);
        fill(&mut pool);
        let mut applier = Applier::new(1, 1);
        assert!(applier.tick(&mut pool, true, &mut NullSink).is_none());
        assert!(applier.tick(&mut pool, false, &mut NullSink).is_some());
    }

    #[test]
    fn each_pass_is_bounded() {
        let mut pool = pool(5);
        fill(&mut pool);
        let mut applier = Applier::new(1, 2);
        let mut sink = Recorder::default();

        let passes: Vec<_> = (0..4)
            .map(|_| applier.tick(&mut pool, false, &mut sink).unwrap().mutations())
            .collect();
        assert_eq!(passes, vec![2, 2, 1, 0]);
        assert_eq!(pool.instance_count(), 10);
        assert!(pool.batches().all(|b| b.state() == BatchState::Idle));

        let order: Vec<_> = sink.added.iter().map(|(id, _)| *id).collect();
        let ids: Vec<_> = pool.batches().map(|b| b.id()).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn clear_then_enough_frames_is_all_clear() {
        let mut pool = pool(3);
        fill(&mut pool);
        let mut applier = Applier::new(1, 1);
        while applier.tick(&mut pool, false, &mut NullSink).unwrap().mutations() > 0 {}
        assert_eq!(pool.instance_count(), 6);

        pool.mark_all_for_clear();
        let mut sink = Recorder::default();
        for _ in 0..3 {
            applier.tick(&mut pool, false, &mut sink);
        }
        assert!(pool.all_clear());
        assert_eq!(sink.cleared.len(), 3);
        assert_eq!(pool.instance_count(), 0);
    }
}
