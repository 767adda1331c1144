//! The process-wide fat-lock table.
//!
//! A two-level array indexed by the compact lock id stored in an object
//! header. Only the first-level table and the first bucket exist at boot;
//! buckets are created lazily and never removed, so id lookups take no
//! lock. Fat locks are allocated once and recycled through a free list.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::monitor::FatLock;
use crate::object::{FAT_MASK, NON_LOCK_BITS};

pub const GLOBAL_SIZE: usize = 128;
pub const BIT_INDEX: usize = 11;
pub const INDEX_SIZE: usize = 1 << BIT_INDEX;
pub const BIT_MASK: usize = INDEX_SIZE - 1;
pub const MAX_LOCKS: usize = GLOBAL_SIZE * INDEX_SIZE;

type Bucket = Box<[AtomicPtr<FatLock>]>;

struct AllocState {
    /// Next never-used id. Always incremented, never decremented.
    current_index: usize,
    /// Released locks available for reuse.
    free: Vec<u32>,
}

pub struct LockTable {
    table: Box<[OnceLock<Bucket>]>,
    alloc: Mutex<AllocState>,
}

fn new_bucket() -> Bucket {
    (0..INDEX_SIZE)
        .map(|_| AtomicPtr::new(std::ptr::null_mut()))
        .collect()
}

impl Default for LockTable {
    fn default() -> LockTable {
        LockTable::new()
    }
}

impl LockTable {
    pub fn new() -> LockTable {
        let table: Box<[OnceLock<Bucket>]> =
            (0..GLOBAL_SIZE).map(|_| OnceLock::new()).collect();
        // The first bucket is created eagerly so that the table does not
        // eat up all memory on startup but the common case never faults.
        let _ = table[0].get_or_init(new_bucket);
        LockTable {
            table,
            alloc: Mutex::new(AllocState {
                current_index: 0,
                free: Vec::new(),
            }),
        }
    }

    /// Allocates a fat lock for `obj`: reuses a freed lock when one is
    /// available, otherwise claims the next id and creates its slot.
    pub fn allocate(&self, obj: crate::object::ObjRef) -> &'static FatLock {
        let mut alloc = self.alloc.lock();
        if let Some(index) = alloc.free.pop() {
            drop(alloc);
            let lock = self.lock_at(index);
            lock.attach(obj);
            return lock;
        }
        let index = alloc.current_index;
        if index == MAX_LOCKS {
            panic!("ran out of space for allocating locks");
        }
        alloc.current_index += 1;
        let bucket = self.table[index >> BIT_INDEX].get_or_init(new_bucket);
        // Fat locks live for the rest of the process; the table is the
        // owner of record.
        let lock: &'static FatLock = Box::leak(Box::new(FatLock::new(index as u32, obj)));
        bucket[index & BIT_MASK].store(lock as *const FatLock as *mut FatLock, Ordering::Release);
        drop(alloc);
        lock
    }

    /// Puts a lock whose object died back on the free list.
    pub fn deallocate(&self, lock: &FatLock) {
        lock.detach();
        self.alloc.lock().free.push(lock.index());
    }

    pub fn lock_at(&self, index: u32) -> &'static FatLock {
        let bucket = self.table[index as usize >> BIT_INDEX]
            .get()
            .expect("fat lock bucket missing for allocated id");
        let ptr = bucket[index as usize & BIT_MASK].load(Ordering::Acquire);
        assert!(!ptr.is_null(), "fat lock missing for allocated id");
        unsafe { &*ptr }
    }

    /// Decodes a header word into its fat lock, if the fat bit is set.
    pub fn from_header(&self, header: usize) -> Option<&'static FatLock> {
        if header & FAT_MASK == 0 {
            return None;
        }
        let index = (header & !FAT_MASK) >> NON_LOCK_BITS;
        Some(self.lock_at(index as u32))
    }
}

/// The compact id of a fat lock as stored in an object header.
pub fn id_for_index(index: u32) -> usize {
    ((index as usize) << NON_LOCK_BITS) | FAT_MASK
}
