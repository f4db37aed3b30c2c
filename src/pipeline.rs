//! Packet processor pipeline
//!
//! An ordered chain of packet processors invoked per packet in ascending
//! priority. Registration mutates a slot table under a mutex; traversal
//! works on a snapshot, so processors registered mid-packet only see
//! subsequent packets. Recirculation depth is carried as a parameter and
//! bounded, never stored in thread-local state.

use crate::packet::PacketBuffer;
use crate::{Error, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// Maximum number of registered processors
pub const MAX_PROCESSORS: usize = 64;
/// Upper bound on pipeline re-entry for one packet
pub const MAX_RECIRCULATION_DEPTH: u32 = 16;

/// Outcome of one processor, and of the traversal as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
    /// Continue to the next processor; final result means "hand to forwarding"
    Forward,
    /// Stop; the packet is discarded
    Drop,
    /// Stop; a control-plane engine took ownership
    Consume,
    /// Restart traversal from the first processor
    Recirculate,
}

/// Processor callback. Engine state is captured by the closure.
pub type ProcessorFn = Arc<dyn Fn(&mut PacketBuffer) -> PipelineResult + Send + Sync>;

/// Opaque handle for a registered processor. Slots are reused after
/// unregistration; the generation counter detects stale handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorHandle {
    slot: u32,
    generation: u32,
}

struct Slot {
    callback: Option<ProcessorFn>,
    priority: u32,
    seq: u64,
    generation: u32,
    name: String,
}

struct SlotTable {
    slots: Vec<Slot>,
    next_seq: u64,
}

/// The registered-processor pipeline
pub struct Pipeline {
    table: Mutex<SlotTable>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        let slots = (0..MAX_PROCESSORS)
            .map(|_| Slot {
                callback: None,
                priority: 0,
                seq: 0,
                generation: 0,
                name: String::new(),
            })
            .collect();
        Self {
            table: Mutex::new(SlotTable { slots, next_seq: 0 }),
        }
    }

    /// Register a processor. Lower priority values run first; equal
    /// priorities keep registration order.
    pub fn register(
        &self,
        name: &str,
        priority: u32,
        callback: ProcessorFn,
    ) -> Result<ProcessorHandle> {
        let mut table = self.table.lock().unwrap();

        let slot_index = table
            .slots
            .iter()
            .position(|s| s.callback.is_none())
            .ok_or_else(|| {
                Error::ResourceExhausted(format!("all {} processor slots in use", MAX_PROCESSORS))
            })?;

        let seq = table.next_seq;
        table.next_seq += 1;

        let slot = &mut table.slots[slot_index];
        slot.callback = Some(callback);
        slot.priority = priority;
        slot.seq = seq;
        slot.name = name.to_string();

        debug!(name, priority, slot = slot_index, "registered packet processor");
        Ok(ProcessorHandle {
            slot: slot_index as u32,
            generation: slot.generation,
        })
    }

    /// Unregister a processor. A stale or unknown handle is an error.
    pub fn unregister(&self, handle: ProcessorHandle) -> Result<()> {
        let mut table = self.table.lock().unwrap();
        let slot = table
            .slots
            .get_mut(handle.slot as usize)
            .ok_or_else(|| Error::InvalidArgument("unknown processor handle".into()))?;

        if slot.callback.is_none() || slot.generation != handle.generation {
            return Err(Error::InvalidArgument("stale processor handle".into()));
        }

        slot.callback = None;
        slot.name.clear();
        // Bump the generation so outstanding copies of this handle go stale
        slot.generation = slot.generation.wrapping_add(1);
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        let table = self.table.lock().unwrap();
        table.slots.iter().filter(|s| s.callback.is_some()).count()
    }

    fn snapshot(&self) -> Vec<(u32, u64, ProcessorFn)> {
        let table = self.table.lock().unwrap();
        let mut entries: Vec<(u32, u64, ProcessorFn)> = table
            .slots
            .iter()
            .filter_map(|s| {
                s.callback
                    .as_ref()
                    .map(|cb| (s.priority, s.seq, Arc::clone(cb)))
            })
            .collect();
        entries.sort_by_key(|&(priority, seq, _)| (priority, seq));
        entries
    }

    /// Run a packet through the pipeline. A `Recirculate` result restarts
    /// the traversal against a fresh snapshot, up to the depth bound.
    pub fn process(&self, packet: &mut PacketBuffer) -> PipelineResult {
        self.process_at_depth(packet, 0)
    }

    fn process_at_depth(&self, packet: &mut PacketBuffer, depth: u32) -> PipelineResult {
        if depth >= MAX_RECIRCULATION_DEPTH {
            error!(
                depth,
                "packet recirculation depth exceeded limit, dropping packet"
            );
            return PipelineResult::Drop;
        }

        let snapshot = self.snapshot();
        let mut result = PipelineResult::Forward;

        for (_, _, callback) in &snapshot {
            result = callback(packet);
            match result {
                PipelineResult::Drop | PipelineResult::Consume => return result,
                PipelineResult::Recirculate => {
                    debug!(depth, "packet recirculation requested");
                    return self.process_at_depth(packet, depth + 1);
                }
                PipelineResult::Forward => {}
            }
        }

        result
    }
}
