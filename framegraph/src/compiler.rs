//! Frame compilation: dependency building, culling and scheduling.
//!
//! Compilation runs in three steps over the passes declared this frame:
//!
//! 1. **Dependencies** - producer to consumer edges from read/write sets,
//!    plus explicit edges added with
//!    [`RenderGraph::add_dependency`](crate::RenderGraph::add_dependency)
//! 2. **Culling** - passes that no side-effecting pass transitively needs
//!    are dropped
//! 3. **Scheduling** - Kahn's algorithm over the live passes, detecting
//!    cycles
//!
//! Afterwards the usage span of every resource is recomputed over the live
//! passes so the allocator only sees what actually runs.

use std::collections::VecDeque;

use crate::error::{FrameGraphError, Result};
use crate::graph::pass::PassEntry;
use crate::graph::resource::ResourceRegistry;

fn add_edge(passes: &mut [PassEntry], dependency: usize, dependent: usize) {
    if passes[dependent].depends_on.contains(&dependency) {
        return;
    }
    passes[dependent].depends_on.push(dependency);
    passes[dependency].dependents.push(dependent);
}

/// Derive producer to consumer edges.
///
/// One scan in declaration order tracks the last writer of every resource.
/// A read depends on the last writer; read-after-read and write-after-write
/// add no edge. Explicit edges are merged in afterwards.
pub(crate) fn build_dependencies(
    passes: &mut [PassEntry],
    explicit_edges: &[(usize, usize)],
    resource_count: usize,
) {
    for pass in passes.iter_mut() {
        pass.clear_derived();
    }

    let mut last_writer: Vec<Option<usize>> = vec![None; resource_count];
    let mut read_since_write = vec![false; resource_count];

    for index in 0..passes.len() {
        for read in 0..passes[index].reads.len() {
            let resource = passes[index].reads[read].index() as usize;
            read_since_write[resource] = true;
            if let Some(writer) = last_writer[resource]
                && writer != index
            {
                add_edge(passes, writer, index);
            }
        }
        for write in 0..passes[index].writes.len() {
            let handle = passes[index].writes[write];
            let resource = handle.index() as usize;
            if let Some(writer) = last_writer[resource]
                && writer != index
                && !read_since_write[resource]
            {
                log::warn!(
                    "Passes '{}' and '{}' both write {:?} with no reader in between; \
                     their writes are unordered",
                    passes[writer].name,
                    passes[index].name,
                    handle
                );
            }
            last_writer[resource] = Some(index);
            read_since_write[resource] = false;
        }
    }

    for &(dependent, dependency) in explicit_edges {
        add_edge(passes, dependency, dependent);
    }
}

/// Mark every pass live that a side-effecting pass transitively depends on.
///
/// Returns the number of live passes.
pub(crate) fn cull(passes: &mut [PassEntry]) -> usize {
    let mut queue: VecDeque<usize> = VecDeque::new();
    for (index, pass) in passes.iter_mut().enumerate() {
        pass.culled = !pass.has_side_effects;
        if pass.has_side_effects {
            queue.push_back(index);
        }
    }

    while let Some(index) = queue.pop_front() {
        for dep in 0..passes[index].depends_on.len() {
            let dependency = passes[index].depends_on[dep];
            if passes[dependency].culled {
                passes[dependency].culled = false;
                queue.push_back(dependency);
            }
        }
    }

    let live = passes.iter().filter(|p| !p.culled).count();
    for pass in passes.iter().filter(|p| p.culled) {
        log::trace!("Culled pass '{}'", pass.name);
    }
    live
}

/// Order the live passes with Kahn's algorithm.
///
/// Zero in-degree passes are queued in declaration order and dequeued FIFO,
/// so the order is deterministic for a fixed declaration.
pub(crate) fn schedule(passes: &mut [PassEntry], order: &mut Vec<usize>) -> Result<()> {
    order.clear();

    let mut in_degree: Vec<usize> = passes
        .iter()
        .map(|pass| {
            pass.depends_on
                .iter()
                .filter(|&&dep| !passes[dep].culled)
                .count()
        })
        .collect();

    let mut queue: VecDeque<usize> = (0..passes.len())
        .filter(|&i| !passes[i].culled && in_degree[i] == 0)
        .collect();

    while let Some(index) = queue.pop_front() {
        passes[index].execution_order = Some(order.len());
        order.push(index);
        for &dependent in &passes[index].dependents {
            if passes[dependent].culled {
                continue;
            }
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    let live = passes.iter().filter(|p| !p.culled).count();
    if order.len() != live {
        let unplaced: Vec<String> = passes
            .iter()
            .filter(|p| !p.culled && p.execution_order.is_none())
            .map(|p| p.name.clone())
            .collect();
        order.clear();
        for pass in passes.iter_mut() {
            pass.execution_order = None;
        }
        return Err(FrameGraphError::CircularDependency { passes: unplaced });
    }
    Ok(())
}

/// Recompute every resource's usage span over the live passes.
pub(crate) fn compute_live_spans(passes: &[PassEntry], resources: &mut ResourceRegistry) {
    let entries = resources.live_entries_mut();
    for entry in entries.iter_mut() {
        entry.first_pass = None;
        entry.last_pass = None;
    }
    for (index, pass) in passes.iter().enumerate() {
        if pass.culled {
            continue;
        }
        for handle in pass.reads.iter().chain(&pass.writes) {
            if let Some(entry) = entries.get_mut(handle.index() as usize) {
                entry.touch(index);
            }
        }
    }
}
