//! Service and session identifiers.
//!
//! Both are 32-bit values that pack an owning worker index into the top 8 bits
//! and a per-worker sequence into the low 24 bits. The encoding is the sole basis
//! for routing a [`crate::message::Message`] or a network send to the worker that
//! owns the target - see `worker_of`/`io_worker_of` below.

const WORKER_SHIFT: u32 = 24;
const SEQUENCE_MASK: u32 = 0x00FF_FFFF;

/// Identifies a [`crate::service::Service`] instance. `0` is reserved to mean
/// "broadcast" when used as a receiver, or "system" when used as a sender.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct ServiceId(pub u32);

/// Identifies a single TCP connection tracked by an I/O worker.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct SessionId(pub u32);

macro_rules! impl_packed_id {
    ($name:ident) => {
        impl $name {
            pub const BROADCAST: $name = $name(0);

            #[inline]
            pub fn new(worker_index: u8, sequence: u32) -> $name {
                debug_assert!(sequence <= SEQUENCE_MASK, "sequence overflows 24 bits");
                $name(((worker_index as u32) << WORKER_SHIFT) | (sequence & SEQUENCE_MASK))
            }

            /// The top 8 bits: the index of the worker that owns this id.
            #[inline]
            pub fn worker_index(self) -> u8 {
                (self.0 >> WORKER_SHIFT) as u8
            }

            /// The low 24 bits: the per-worker sequence this id was allocated with.
            #[inline]
            pub fn sequence(self) -> u32 {
                self.0 & SEQUENCE_MASK
            }

            #[inline]
            pub fn is_broadcast(self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(raw: u32) -> $name {
                $name(raw)
            }
        }

        impl From<$name> for u32 {
            #[inline]
            fn from(id: $name) -> u32 {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}:{}", self.worker_index(), self.sequence())
            }
        }
    };
}

impl_packed_id!(ServiceId);
impl_packed_id!(SessionId);

/// Monotonically hands out the next sequence for a worker-local counter,
/// wrapping at the 24-bit ceiling and skipping any value for which `collides`
/// returns `true`. Used by both service workers (against their own directory)
/// and I/O workers (against their own session table).
pub struct SequenceAllocator {
    next: u32,
}

impl SequenceAllocator {
    pub fn new() -> SequenceAllocator {
        SequenceAllocator { next: 1 }
    }

    /// Allocates the next free sequence, scanning forward (wrapping through 1,
    /// since 0 is reserved) until `collides` reports an unused value.
    pub fn alloc<F: Fn(u32) -> bool>(&mut self, collides: F) -> u32 {
        let mut candidate = self.next;
        loop {
            if candidate == 0 {
                candidate = 1;
            }
            if !collides(candidate) {
                self.next = candidate.wrapping_add(1) & SEQUENCE_MASK;
                return candidate;
            }
            candidate = candidate.wrapping_add(1) & SEQUENCE_MASK;
        }
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        SequenceAllocator::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let id = ServiceId::new(3, 0x00ABCDEF & SEQUENCE_MASK);
        assert_eq!(id.worker_index(), 3);
        assert_eq!(id.sequence(), 0x00ABCDEF & SEQUENCE_MASK);
    }

    #[test]
    fn test_broadcast() {
        assert!(ServiceId::BROADCAST.is_broadcast());
        assert!(!ServiceId::new(0, 1).is_broadcast());
    }

    #[test]
    fn test_allocator_skips_collisions() {
        let mut alloc = SequenceAllocator::new();
        let taken = [1u32, 2, 3];
        let id = alloc.alloc(|c| taken.contains(&c));
        assert_eq!(id, 4);
    }

    #[test]
    fn test_allocator_wraps() {
        let mut alloc = SequenceAllocator::new();
        alloc.next = SEQUENCE_MASK;
        let first = alloc.alloc(|_| false);
        assert_eq!(first, SEQUENCE_MASK);
        let second = alloc.alloc(|_| false);
        assert_eq!(second, 1);
    }
}
