//! In-memory fakes of the three injected collaborators
//! ([`crate::share::ShareEngine`], [`crate::local_buffer::LocalBuffer`],
//! [`crate::directory::Directory`]) plus a fake clock and RNG, used by
//! this crate's own `#[test]`s. Compiled only under `cfg(test, feature =
//! "std")` — never shipped to a host integration.

pub mod fake_clock {
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::clock::{Clock, Instant};

    #[derive(Default)]
    pub struct FakeClock {
        now: AtomicU64,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self { now: AtomicU64::new(0) }
        }

        pub fn advance(&self, ms: u64) {
            self.now.fetch_add(ms, Ordering::Relaxed);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            Instant(self.now.load(Ordering::Relaxed))
        }

        fn sleep_us(&self, micros: u32) {
            self.advance((micros as u64).div_ceil(1000).max(1));
        }
    }
}

pub mod fake_rng {
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::handle_alloc::Rng;

    #[derive(Default)]
    pub struct FakeRng {
        counter: AtomicU32,
    }

    impl FakeRng {
        pub fn new() -> Self {
            Self { counter: AtomicU32::new(1) }
        }
    }

    impl Rng for FakeRng {
        fn next_u32(&self) -> u32 {
            self.counter.fetch_add(1, Ordering::Relaxed)
        }
    }
}

pub mod fake_share {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use alloc::vec::Vec;

    use crate::error::{Error, Result};
    use crate::share::{GrantRef, MapHandle, ShareEngine};

    enum Grant {
        Data(u64),
        Index(Vec<u64>),
    }

    /// Models grant/map/unmap bookkeeping in a plain `HashMap`; refcounts
    /// foreign maps so `ungrant_page` can report `StillReferenced`.
    #[derive(Default)]
    pub struct FakeShareEngine {
        next_ref: AtomicU64,
        grants: Mutex<HashMap<u64, Grant>>,
        outstanding_maps: Mutex<HashMap<u64, u32>>,
    }

    impl FakeShareEngine {
        pub fn new() -> Self {
            Self {
                next_ref: AtomicU64::new(1),
                grants: Mutex::new(HashMap::new()),
                outstanding_maps: Mutex::new(HashMap::new()),
            }
        }

        fn fresh_ref(&self) -> u64 {
            self.next_ref.fetch_add(1, Ordering::Relaxed)
        }
    }

    impl ShareEngine for FakeShareEngine {
        fn grant_data_page(&self, page: u64) -> Result<GrantRef> {
            let r = self.fresh_ref();
            self.grants.lock().unwrap().insert(r, Grant::Data(page));
            Ok(GrantRef(r))
        }

        fn grant_index_page(&self, refs: &[u64]) -> Result<GrantRef> {
            let r = self.fresh_ref();
            self.grants.lock().unwrap().insert(r, Grant::Index(refs.to_vec()));
            Ok(GrantRef(r))
        }

        fn ungrant_page(&self, grant: GrantRef) -> Result<()> {
            if self.outstanding_maps.lock().unwrap().get(&grant.0).copied().unwrap_or(0) > 0 {
                return Err(Error::StillReferenced);
            }
            self.grants.lock().unwrap().remove(&grant.0);
            Ok(())
        }

        fn map_data_page(&self, grant: GrantRef) -> Result<MapHandle> {
            let grants = self.grants.lock().unwrap();
            match grants.get(&grant.0) {
                Some(Grant::Data(_)) => {
                    *self.outstanding_maps.lock().unwrap().entry(grant.0).or_insert(0) += 1;
                    Ok(MapHandle(grant.0))
                }
                _ => Err(Error::NotFound),
            }
        }

        fn map_index_page(&self, grant: GrantRef) -> Result<(MapHandle, Vec<u64>)> {
            let grants = self.grants.lock().unwrap();
            match grants.get(&grant.0) {
                Some(Grant::Index(refs)) => {
                    let refs = refs.clone();
                    drop(grants);
                    *self.outstanding_maps.lock().unwrap().entry(grant.0).or_insert(0) += 1;
                    Ok((MapHandle(grant.0), refs))
                }
                _ => Err(Error::NotFound),
            }
        }

        fn unmap_page(&self, map: MapHandle) -> Result<()> {
            let mut outstanding = self.outstanding_maps.lock().unwrap();
            match outstanding.get_mut(&map.0) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    Ok(())
                }
                _ => Err(Error::ProtocolViolation),
            }
        }
    }
}

pub mod fake_local_buffer {
    use std::sync::atomic::{AtomicU64, Ordering};

    use alloc::vec::Vec;

    use crate::error::Result;
    use crate::local_buffer::{AttachRef, LocalBuffer, SgtRef, VirtAddrRef};
    use crate::page::Segment;

    pub struct FakeLocalBuffer {
        size: usize,
        next_ref: AtomicU64,
    }

    impl FakeLocalBuffer {
        pub fn new(size: usize) -> Self {
            Self { size, next_ref: AtomicU64::new(1) }
        }

        fn fresh(&self) -> u64 {
            self.next_ref.fetch_add(1, Ordering::Relaxed)
        }
    }

    impl LocalBuffer for FakeLocalBuffer {
        fn size(&self) -> usize {
            self.size
        }

        fn segments(&self) -> Vec<Segment> {
            alloc::vec![Segment { page: 0, offset: 0, length: self.size }]
        }

        fn attach(&self) -> Result<AttachRef> {
            Ok(AttachRef(self.fresh()))
        }
        fn detach(&self, _attach: AttachRef) -> Result<()> {
            Ok(())
        }
        fn map(&self, _attach: AttachRef) -> Result<SgtRef> {
            Ok(SgtRef(self.fresh()))
        }
        fn unmap(&self, _sgt: SgtRef) -> Result<()> {
            Ok(())
        }
        fn begin_cpu_access(&self) -> Result<()> {
            Ok(())
        }
        fn end_cpu_access(&self) -> Result<()> {
            Ok(())
        }
        fn kmap(&self) -> Result<VirtAddrRef> {
            Ok(VirtAddrRef(self.fresh()))
        }
        fn kunmap(&self, _addr: VirtAddrRef) -> Result<()> {
            Ok(())
        }
        fn kmap_atomic(&self) -> Result<VirtAddrRef> {
            Ok(VirtAddrRef(self.fresh()))
        }
        fn kunmap_atomic(&self, _addr: VirtAddrRef) -> Result<()> {
            Ok(())
        }
        fn vmap(&self) -> Result<VirtAddrRef> {
            Ok(VirtAddrRef(self.fresh()))
        }
        fn vunmap(&self, _addr: VirtAddrRef) -> Result<()> {
            Ok(())
        }
        fn release(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Opening the same `fd` twice must yield the same buffer object —
    /// real dmabuf fds refcount a single underlying allocation — so
    /// opens are cached per-fd rather than minting a fresh buffer each
    /// call.
    pub struct FakeLocalBufferSource {
        pub next_fd: AtomicU64,
        opened: std::sync::Mutex<std::collections::HashMap<i32, crate::local_buffer::LocalBufferRef>>,
    }

    impl Default for FakeLocalBufferSource {
        fn default() -> Self {
            Self {
                next_fd: AtomicU64::new(100),
                opened: std::sync::Mutex::new(std::collections::HashMap::new()),
            }
        }
    }

    impl crate::local_buffer::LocalBufferSource for FakeLocalBufferSource {
        fn open(&self, fd: i32) -> Result<crate::local_buffer::LocalBufferRef> {
            let mut opened = self.opened.lock().unwrap();
            let buf = opened
                .entry(fd)
                .or_insert_with(|| alloc::sync::Arc::new(FakeLocalBuffer::new(4096)))
                .clone();
            Ok(buf)
        }

        fn export_fd(&self, _buf: crate::local_buffer::LocalBufferRef) -> Result<i32> {
            Ok(self.next_fd.fetch_add(1, Ordering::Relaxed) as i32)
        }
    }
}

pub mod fake_directory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use alloc::boxed::Box;
    use alloc::string::String;

    use crate::directory::{Directory, PeerAdvert};
    use crate::error::Result;

    #[derive(Default)]
    pub struct FakeDirectory {
        entries: Mutex<HashMap<String, PeerAdvert>>,
    }

    impl FakeDirectory {
        pub fn new() -> Self {
            Self { entries: Mutex::new(HashMap::new()) }
        }
    }

    impl Directory for FakeDirectory {
        fn publish(&self, path: &str, advert: PeerAdvert) -> Result<()> {
            self.entries.lock().unwrap().insert(path.into(), advert);
            Ok(())
        }

        fn remove(&self, path: &str) -> Result<()> {
            self.entries.lock().unwrap().remove(path);
            Ok(())
        }

        fn read(&self, path: &str) -> Option<PeerAdvert> {
            self.entries.lock().unwrap().get(path).copied()
        }

        fn watch(&self, _path: &str, _on_change: Box<dyn Fn(Option<PeerAdvert>) + Send>) {
            // The fake resolves peer discovery synchronously via `read`
            // in these tests; no test exercises the async watch path.
        }
    }
}

pub mod fake_event_channel {
    use std::sync::atomic::{AtomicU32, Ordering};

    use dmabuf_abi::VmId;

    use crate::transport::EventChannel;

    #[derive(Default)]
    pub struct FakeEventChannel {
        pub notifications: AtomicU32,
    }

    impl EventChannel for FakeEventChannel {
        fn notify(&self, _peer: VmId) {
            self.notifications.fetch_add(1, Ordering::Relaxed);
        }
    }
}
