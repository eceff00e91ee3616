//! Submission engine.
//!
//! Every frame-in-flight slot owns a grow-only pool of command lists, one
//! completion semaphore per command list and a frame fence. During compile
//! each live non-external pass is given the next command list of the
//! current slot. After recording, passes are submitted in execution order:
//!
//! | Pass | Waits on | Signals |
//! |------|----------|---------|
//! | regular | completion semaphores of its dependencies | its own semaphore |
//! | external dependency | the semaphore the external pass returned, or else the waits of its own dependencies | |
//! | last regular pass | | its semaphore and the frame fence |
//!
//! ```text
//! Frame 0: [declare] [compile] [record] [submit, fence F0] ─────────────►
//! Frame 1:            [declare] [compile] [record] [submit, fence F1] ──►
//! Frame 2:                                [wait F0] [declare] ... ─────►
//! ```
//!
//! The slot's fence is waited on before the slot is reused, so pooled
//! command lists, semaphores and transients are never touched while the
//! GPU still uses them.

use crate::backend::{GpuBackend, GpuCommandList, GpuFence, GpuSemaphore};
use crate::error::Result;
use crate::graph::pass::PassEntry;

struct SlotSync {
    command_lists: Vec<GpuCommandList>,
    semaphores: Vec<GpuSemaphore>,
    fence: GpuFence,
    fence_pending: bool,
}

impl std::fmt::Debug for SlotSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotSync")
            .field("command_lists", &self.command_lists.len())
            .field("semaphores", &self.semaphores.len())
            .field("fence_pending", &self.fence_pending)
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct SubmissionEngine {
    slots: Vec<SlotSync>,
}

impl SubmissionEngine {
    pub(crate) fn new(backend: &dyn GpuBackend, frames_in_flight: usize) -> Result<Self> {
        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            slots.push(SlotSync {
                command_lists: Vec::new(),
                semaphores: Vec::new(),
                fence: backend.create_fence(false)?,
                fence_pending: false,
            });
        }
        Ok(Self { slots })
    }

    /// Block until the slot's last submission has retired.
    ///
    /// Returns true if there was anything to wait for.
    pub(crate) fn wait_slot(&mut self, backend: &dyn GpuBackend, slot: usize) -> Result<bool> {
        let sync = &mut self.slots[slot];
        if !sync.fence_pending {
            return Ok(false);
        }
        crate::profile_scope!("wait_frame_fence");
        log::trace!("Waiting for frame slot {}", slot);
        backend.wait_fence(&sync.fence)?;
        backend.reset_fence(&sync.fence)?;
        sync.fence_pending = false;
        Ok(true)
    }

    /// Block until every slot has retired.
    pub(crate) fn wait_all(&mut self, backend: &dyn GpuBackend) -> Result<()> {
        for slot in 0..self.slots.len() {
            self.wait_slot(backend, slot)?;
        }
        Ok(())
    }

    pub(crate) fn is_pending(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|sync| sync.fence_pending)
    }

    /// Number of command lists pooled by a slot.
    pub(crate) fn pool_size(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, |sync| sync.command_lists.len())
    }

    /// Give every live regular pass a command list and semaphore of `slot`.
    pub(crate) fn assign(
        &mut self,
        backend: &dyn GpuBackend,
        slot: usize,
        passes: &mut [PassEntry],
        order: &[usize],
    ) -> Result<usize> {
        let sync = &mut self.slots[slot];
        let needed = order.iter().filter(|&&i| !passes[i].is_external()).count();

        if sync.command_lists.len() < needed {
            let missing = needed - sync.command_lists.len();
            sync.command_lists
                .extend(backend.create_command_lists(missing)?);
            log::debug!(
                "Slot {} command list pool grew to {}",
                slot,
                sync.command_lists.len()
            );
        }
        while sync.semaphores.len() < needed {
            sync.semaphores.push(backend.create_semaphore()?);
        }

        let mut next = 0;
        for &index in order {
            if !passes[index].is_external() {
                passes[index].command_list = Some(next);
                next += 1;
            }
        }
        Ok(next)
    }

    pub(crate) fn command_list(&self, slot: usize, index: usize) -> &GpuCommandList {
        &self.slots[slot].command_lists[index]
    }

    /// Submit every recorded pass in execution order.
    ///
    /// Returns the number of submissions.
    pub(crate) fn submit(
        &mut self,
        backend: &dyn GpuBackend,
        slot: usize,
        passes: &[PassEntry],
        order: &[usize],
    ) -> Result<usize> {
        crate::profile_scope!("submit_passes");

        let sync = &mut self.slots[slot];
        let last = order
            .iter()
            .rev()
            .copied()
            .find(|&i| passes[i].command_list.is_some());
        let mut submitted = 0;

        for &index in order {
            let pass = &passes[index];
            let Some(list) = pass.command_list else {
                continue;
            };

            let mut waits: Vec<&GpuSemaphore> = Vec::with_capacity(pass.depends_on.len());
            for &dep in &pass.depends_on {
                collect_waits(passes, &sync.semaphores, dep, &mut waits);
            }

            let attach_fence = Some(index) == last;
            let fence = attach_fence.then_some(&sync.fence);
            log::trace!(
                "Submitting pass '{}' ({} waits{})",
                pass.name,
                waits.len(),
                if attach_fence { ", frame fence" } else { "" }
            );
            let result = backend.submit(
                &sync.command_lists[list],
                &waits,
                &[&sync.semaphores[list]],
                fence,
            );
            if let Err(error) = result {
                // Earlier passes of this frame are on the queue without the
                // frame fence; drain it before the slot can be reused.
                if submitted > 0 {
                    log::error!(
                        "Submitting pass '{}' failed after {} submissions; waiting for the queue",
                        pass.name,
                        submitted
                    );
                    if let Err(idle) = backend.wait_idle() {
                        log::error!("wait_idle failed after a partial submission: {}", idle);
                    }
                }
                return Err(error.into());
            }
            if attach_fence {
                sync.fence_pending = true;
            }
            submitted += 1;
        }
        Ok(submitted)
    }
}

/// Add the semaphores a dependent of `dep` must wait on.
///
/// A regular dependency contributes its completion semaphore. An external
/// dependency contributes the semaphore it returned; without one, the waits
/// of its own dependencies are carried over so ordering to their producers
/// is kept.
fn collect_waits<'a>(
    passes: &'a [PassEntry],
    semaphores: &'a [GpuSemaphore],
    dep: usize,
    waits: &mut Vec<&'a GpuSemaphore>,
) {
    let dependency = &passes[dep];
    let semaphore = match dependency.command_list {
        Some(list) => Some(&semaphores[list]),
        None => dependency
            .external_result
            .as_ref()
            .and_then(|result| result.semaphore.as_deref()),
    };
    match semaphore {
        Some(semaphore) => {
            if !waits.iter().any(|&w| std::ptr::eq(w, semaphore)) {
                waits.push(semaphore);
            }
        }
        None if dependency.is_external() => {
            for &upstream in &dependency.depends_on {
                collect_waits(passes, semaphores, upstream, waits);
            }
        }
        None => {}
    }
}
