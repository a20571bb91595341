use crate::config::UltrasoundConfig;
use crate::error::UltrasoundError;
use crate::fsm::UltrasoundFsm;
use crate::hal::{PortBinding, UltrasoundPort};
use log::debug;

/// Generational index into a [`SensorRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorHandle {
    index: usize,
    generation: u32,
}

impl SensorHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

struct Slot<P: UltrasoundPort> {
    generation: u32,
    fsm: Option<UltrasoundFsm<P>>,
}

/// Fixed-capacity table of ranging instances.
///
/// Handles carry the slot generation, so a handle kept past `destroy` keeps
/// failing with `UseAfterDestroy` even after the slot is reused.
pub struct SensorRegistry<P: UltrasoundPort> {
    slots: Vec<Slot<P>>,
    capacity: usize,
}

impl<P: UltrasoundPort> SensorRegistry<P> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.fsm.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create(
        &mut self,
        port: P,
        binding: PortBinding,
        config: UltrasoundConfig,
    ) -> Result<SensorHandle, UltrasoundError> {
        let index = match self.slots.iter().position(|s| s.fsm.is_none()) {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot {
                    generation: 0,
                    fsm: None,
                });
                self.slots.len() - 1
            }
            None => {
                return Err(UltrasoundError::Allocation {
                    capacity: self.capacity,
                })
            }
        };

        let fsm = UltrasoundFsm::new(port, binding, config)?;
        let slot = &mut self.slots[index];
        slot.fsm = Some(fsm);
        debug!("ultrasound {}: created in slot {}", binding, index);
        Ok(SensorHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Releases the instance and hands back its port. Destroying twice is a no-op.
    pub fn destroy(&mut self, handle: SensorHandle) -> Option<P> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        let fsm = slot.fsm.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(fsm.destroy())
    }

    pub fn get(&self, handle: SensorHandle) -> Result<&UltrasoundFsm<P>, UltrasoundError> {
        self.slots
            .get(handle.index)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.fsm.as_ref())
            .ok_or(UltrasoundError::UseAfterDestroy {
                index: handle.index,
                generation: handle.generation,
            })
    }

    pub fn get_mut(
        &mut self,
        handle: SensorHandle,
    ) -> Result<&mut UltrasoundFsm<P>, UltrasoundError> {
        self.slots
            .get_mut(handle.index)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.fsm.as_mut())
            .ok_or(UltrasoundError::UseAfterDestroy {
                index: handle.index,
                generation: handle.generation,
            })
    }

    pub fn fire(&mut self, handle: SensorHandle) -> Result<bool, UltrasoundError> {
        Ok(self.get_mut(handle)?.fire())
    }

    /// Fires every live instance once. Returns the number of transitions taken.
    pub fn fire_all(&mut self) -> usize {
        self.iter_mut()
            .map(|(_, fsm)| fsm.fire())
            .filter(|fired| *fired)
            .count()
    }

    /// Moves every port's clock forward.
    pub fn advance_all(&mut self, dt_us: u64) {
        for (_, fsm) in self.iter_mut() {
            fsm.port_mut().advance(dt_us);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SensorHandle, &UltrasoundFsm<P>)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.fsm.as_ref().map(|fsm| {
                (
                    SensorHandle {
                        index,
                        generation: slot.generation,
                    },
                    fsm,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SensorHandle, &mut UltrasoundFsm<P>)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.fsm
                .as_mut()
                .map(|fsm| (SensorHandle { index, generation }, fsm))
        })
    }
}
