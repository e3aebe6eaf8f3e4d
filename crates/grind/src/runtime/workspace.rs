//! Scratch storage for intermediate tensors.

/// Workspace backing every internal tensor of one runtime.
///
/// Each internal value gets its own f32 slot; the reshape phase sizes the
/// slots deterministically from the propagated shapes. Slots are keyed by
/// value index, so non-internal values simply hold empty slots.
#[derive(Debug, Default)]
pub struct Workspace {
    slots: Vec<Vec<f32>>,
    total_elements: usize,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-sizes every slot; `sizes[i]` is the element count for value `i`
    /// (zero for values not backed by the workspace).
    pub(crate) fn layout(&mut self, sizes: &[usize]) {
        self.slots.resize(sizes.len(), Vec::new());
        for (slot, &size) in self.slots.iter_mut().zip(sizes) {
            slot.resize(size, 0.0);
        }
        self.total_elements = sizes.iter().sum();
    }

    /// Total scratch elements after the last layout.
    pub fn total_elements(&self) -> usize {
        self.total_elements
    }

    pub(crate) fn slot(&self, index: usize) -> &[f32] {
        &self.slots[index]
    }

    pub(crate) fn take_slot(&mut self, index: usize) -> Vec<f32> {
        std::mem::take(&mut self.slots[index])
    }

    pub(crate) fn put_slot(&mut self, index: usize, buf: Vec<f32>) {
        self.slots[index] = buf;
    }

    /// Frees all scratch storage.
    pub(crate) fn clear(&mut self) {
        self.slots = Vec::new();
        self.total_elements = 0;
    }
}
