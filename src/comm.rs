//! Process groups and the collective operations used during assembly.
//!
//! Every member of a group must call the same collectives in the same order. A collective
//! blocks until all members have entered it.
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Barrier};

/// A group of cooperating processes, each owning a part of the rows of a distributed matrix.
pub trait ProcessGroup: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn barrier(&self);

    /// Logical-or reduction of `flag` over all members.
    fn any(&self, flag: bool) -> bool;

    /// All-to-all exchange.
    ///
    /// `outgoing[r]` is delivered to member `r`. The returned vector holds, at index `r`, the
    /// items sent by member `r` to this member.
    fn exchange<X: Send + 'static>(&self, outgoing: Vec<Vec<X>>) -> Vec<Vec<X>>;
}

/// The trivial group consisting of a single process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialGroup;

impl ProcessGroup for SerialGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn any(&self, flag: bool) -> bool {
        flag
    }

    fn exchange<X: Send + 'static>(&self, outgoing: Vec<Vec<X>>) -> Vec<Vec<X>> {
        assert_eq!(outgoing.len(), 1, "Serial group exchanges with exactly one member");
        outgoing
    }
}

struct Shared {
    size: usize,
    barrier: Barrier,
    // slots[from * size + to]
    slots: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
    flags: Mutex<Vec<bool>>,
}

/// An in-process group whose members are threads.
///
/// Each member holds its own handle, created together with [`ThreadGroup::create`]. The handles
/// are typically moved into the threads of a `std::thread::scope`.
#[derive(Clone)]
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<Shared>,
}

impl fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

impl ThreadGroup {
    /// Creates the handles of a group with `size` members, ordered by rank.
    pub fn create(size: usize) -> Vec<ThreadGroup> {
        assert!(size > 0, "A process group needs at least one member");
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new((0..size * size).map(|_| None).collect()),
            flags: Mutex::new(vec![false; size]),
        });
        (0..size)
            .map(|rank| ThreadGroup {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn any(&self, flag: bool) -> bool {
        self.shared.flags.lock()[self.rank] = flag;
        self.barrier();
        let result = self.shared.flags.lock().iter().any(|&f| f);
        // Nobody may overwrite a flag before everyone has read them
        self.barrier();
        result
    }

    fn exchange<X: Send + 'static>(&self, outgoing: Vec<Vec<X>>) -> Vec<Vec<X>> {
        let size = self.size();
        assert_eq!(outgoing.len(), size, "Exchange needs one outgoing buffer per member");
        {
            let mut slots = self.shared.slots.lock();
            for (to, items) in outgoing.into_iter().enumerate() {
                slots[self.rank * size + to] = Some(Box::new(items));
            }
        }
        self.barrier();
        let incoming = {
            let mut slots = self.shared.slots.lock();
            (0..size)
                .map(|from| {
                    slots[from * size + self.rank]
                        .take()
                        .and_then(|boxed| boxed.downcast::<Vec<X>>().ok())
                        .map(|items| *items)
                        .expect("All members must exchange items of the same type")
                })
                .collect()
        };
        self.barrier();
        incoming
    }
}
