//! The pool itself and its refcounted buffer handles.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use streamtee_metrics::{registry, Gauge};

/// Per-buffer bookkeeping.
struct Slot {
    /// Current length, `0..=buffer_size`. Reset to the full capacity when
    /// the buffer is recycled.
    len: AtomicUsize,
    /// Reference count. 0 while the buffer sits in the free queue.
    refs: AtomicI64,
    /// Bumped on every recycle.
    tag: AtomicU32,
}

/// State shared between the pool and all outstanding [`Buf`] handles.
///
/// # Safety
///
/// `mem` is a single allocation of `count * size` bytes, carved into
/// non-overlapping per-slot regions. A slot's bytes are only written
/// between `acquire_first` and the first hand-off of the buffer, by the
/// single task that took it; afterwards every holder reads only. That
/// protocol is what makes the raw-slice accessors sound.
struct PoolShared {
    mem: NonNull<u8>,
    layout: Layout,
    size: usize,
    count: u32,
    slots: Box<[Slot]>,
    avail: AtomicI64,
    next_tag: AtomicU32,
    free_tx: mpsc::Sender<u32>,
    avail_gauge: Arc<Gauge>,
}

unsafe impl Send for PoolShared {}
unsafe impl Sync for PoolShared {}

impl Drop for PoolShared {
    fn drop(&mut self) {
        unsafe { dealloc(self.mem.as_ptr(), self.layout) };
    }
}

/// A fixed-size pool of fixed-size byte buffers.
pub struct BufferPool {
    shared: Arc<PoolShared>,
    free_rx: Mutex<mpsc::Receiver<u32>>,
}

impl BufferPool {
    /// Create a pool of `count` buffers of `size` bytes each.
    ///
    /// `name` scopes the pool's availability gauge in the metrics
    /// registry (`bufpool.<name>.avail`).
    ///
    /// # Panics
    ///
    /// Panics if `count` or `size` is zero, or if the backing allocation
    /// fails.
    pub fn new(name: &str, count: usize, size: usize) -> Self {
        assert!(count > 0, "buffer pool needs at least one buffer");
        assert!(size > 0, "buffer pool buffers need a nonzero size");
        let count = u32::try_from(count).expect("buffer count out of range");

        let layout = Layout::array::<u8>(count as usize * size)
            .expect("buffer pool dimensions overflow");
        let mem = NonNull::new(unsafe { alloc_zeroed(layout) })
            .expect("buffer pool allocation failed");

        let slots: Box<[Slot]> = (0..count)
            .map(|n| Slot {
                len: AtomicUsize::new(size),
                refs: AtomicI64::new(0),
                tag: AtomicU32::new(n),
            })
            .collect();

        let (free_tx, free_rx) = mpsc::channel(count as usize);
        let avail_gauge = registry().gauge(&format!("bufpool.{name}.avail"));
        avail_gauge.set(count as i64);

        let shared = Arc::new(PoolShared {
            mem,
            layout,
            size,
            count,
            slots,
            avail: AtomicI64::new(count as i64),
            next_tag: AtomicU32::new(count),
            free_tx,
            avail_gauge,
        });

        for index in 0..count {
            shared
                .free_tx
                .try_send(index)
                .expect("free queue sized to hold every buffer");
        }

        Self {
            shared,
            free_rx: Mutex::new(free_rx),
        }
    }

    /// Wait for a buffer to become available.
    ///
    /// The caller must claim the returned buffer with
    /// [`Buf::acquire_first`] before using it.
    pub async fn take(&self) -> Buf {
        let mut rx = self.free_rx.lock().await;
        let index = rx
            .recv()
            .await
            .expect("free queue cannot close while the pool is alive");
        Buf {
            shared: Arc::clone(&self.shared),
            index,
        }
    }

    /// Take a buffer only if one is immediately available.
    pub fn try_take(&self) -> Option<Buf> {
        let mut rx = self.free_rx.try_lock().ok()?;
        let index = rx.try_recv().ok()?;
        Some(Buf {
            shared: Arc::clone(&self.shared),
            index,
        })
    }

    /// True if every buffer is back in the pool.
    pub fn is_full(&self) -> bool {
        self.shared.avail.load(Ordering::Acquire) == self.shared.count as i64
    }

    /// Number of buffers currently in the pool.
    pub fn available(&self) -> usize {
        self.shared.avail.load(Ordering::Acquire).max(0) as usize
    }

    /// Total number of buffers.
    pub fn capacity(&self) -> usize {
        self.shared.count as usize
    }

    /// Size of each buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.shared.size
    }
}

/// Handle to one buffer of a [`BufferPool`].
///
/// Cloning the handle does not touch the reference count; references are
/// managed explicitly through [`Buf::acquire`] and [`Buf::free`].
pub struct Buf {
    shared: Arc<PoolShared>,
    index: u32,
}

impl Clone for Buf {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            index: self.index,
        }
    }
}

impl Buf {
    fn slot(&self) -> &Slot {
        &self.shared.slots[self.index as usize]
    }

    /// Claim a buffer freshly received from the pool, setting its
    /// reference count to 1.
    ///
    /// # Panics
    ///
    /// Panics if the buffer was handed out with a nonzero reference count.
    pub fn acquire_first(&self) {
        if self
            .slot()
            .refs
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            panic!("buffer taken from the pool with a nonzero refcount");
        }

        let avail = self.shared.avail.fetch_sub(1, Ordering::AcqRel) - 1;
        if avail < 0 {
            panic!("buffer pool availability went negative");
        }
        self.shared.avail_gauge.set(avail);
    }

    /// Add `refs` references on behalf of additional holders.
    ///
    /// # Panics
    ///
    /// Panics if `refs` is negative or if the buffer has already been
    /// fully freed (use after free).
    pub fn acquire(&self, refs: i64) {
        if refs < 0 {
            panic!("refcount increment must not be negative");
        }
        if self.slot().refs.fetch_add(refs, Ordering::AcqRel) <= 0 {
            panic!("acquired a buffer that was already freed");
        }
    }

    /// Drop one reference. The last reference recycles the buffer: its
    /// length snaps back to the full capacity, its tag is bumped, and it
    /// reenters the free queue. The handle must not be used afterwards.
    ///
    /// # Panics
    ///
    /// Panics if the buffer has no outstanding references.
    pub fn free(&self) {
        let remain = self.slot().refs.fetch_sub(1, Ordering::AcqRel) - 1;
        if remain > 0 {
            return;
        }
        if remain < 0 {
            panic!("freed more references than were acquired");
        }

        let slot = self.slot();
        slot.len.store(self.shared.size, Ordering::Release);
        slot.tag.store(
            self.shared.next_tag.fetch_add(1, Ordering::AcqRel) + 1,
            Ordering::Release,
        );

        let avail = self.shared.avail.fetch_add(1, Ordering::AcqRel) + 1;
        if avail > self.shared.count as i64 {
            panic!("buffer pool availability exceeded its capacity");
        }
        self.shared.avail_gauge.set(avail);

        self.shared
            .free_tx
            .try_send(self.index)
            .expect("requeuing a pool buffer must never block");
    }

    /// The buffer's bytes, up to the current length.
    pub fn as_slice(&self) -> &[u8] {
        let len = self.slot().len.load(Ordering::Acquire);
        unsafe {
            std::slice::from_raw_parts(
                self.shared.mem.as_ptr().add(self.index as usize * self.shared.size),
                len,
            )
        }
    }

    /// Mutable view of the buffer's bytes, up to the current length.
    ///
    /// Only the task that claimed the buffer may write to it, and only
    /// before handing it off.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.slot().len.load(Ordering::Acquire);
        unsafe {
            std::slice::from_raw_parts_mut(
                self.shared.mem.as_ptr().add(self.index as usize * self.shared.size),
                len,
            )
        }
    }

    /// Set the current length.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the buffer capacity.
    pub fn set_len(&mut self, len: usize) {
        if len > self.shared.size {
            panic!(
                "tried to set buffer length to {len} but the capacity is {}",
                self.shared.size
            );
        }
        self.slot().len.store(len, Ordering::Release);
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.slot().len.load(Ordering::Acquire)
    }

    /// True if the current length is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum length in bytes. The same for every buffer of a pool.
    pub fn capacity(&self) -> usize {
        self.shared.size
    }

    /// Recycle generation of this buffer.
    pub fn tag(&self) -> u32 {
        self.slot().tag.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Buf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buf")
            .field("index", &self.index)
            .field("len", &self.len())
            .field("tag", &self.tag())
            .finish()
    }
}
