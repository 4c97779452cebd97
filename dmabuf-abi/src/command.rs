//! Commands and operation codes carried in a [`crate::frame::Frame`].

/// The top-level command a [`crate::frame::Frame`] carries.
///
/// Grouped the way the reference kernel groups its own syscall opcode
/// ranges: by direction and by how the receiver must handle it (inline
/// on the interrupt path vs. handed to a worker).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Exporter -> importer. Announce a newly exported buffer. Handled on
    /// a worker queue; never processed inline on the ring ISR.
    Export = 0x1,
    /// Exporter -> importer. Mark a previously exported buffer invalid.
    NotifyUnexport = 0x2,
    /// Importer -> exporter, synchronous. Request a local fd for a
    /// previously announced buffer.
    ExportFd = 0x3,
    /// Importer -> exporter. Compensating frame sent when local fd
    /// creation failed after `ExportFd` already succeeded.
    ExportFdFailed = 0x4,
    /// Importer -> exporter. Forward a shadow-buffer operation to be
    /// replayed against the real buffer.
    OpsToSource = 0x5,
    /// Reserved; exporter -> importer follow-up notifications. Unused by
    /// the current operation set but kept so peers on either side can
    /// reject it explicitly instead of treating it as unknown.
    OpsToRemote = 0x6,
}

impl Command {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x1 => Some(Self::Export),
            0x2 => Some(Self::NotifyUnexport),
            0x3 => Some(Self::ExportFd),
            0x4 => Some(Self::ExportFdFailed),
            0x5 => Some(Self::OpsToSource),
            0x6 => Some(Self::OpsToRemote),
            _ => None,
        }
    }
}

/// Operation forwarded by the shadow buffer via [`Command::OpsToSource`].
///
/// Mirrors the host DMA-buffer operation contract; `Attach`/`Map`/`Kmap`/
/// `Vmap` push onto the exporter's per-handle activity stack and the
/// matching `Detach`/`Unmap`/`Kunmap`/`Vunmap` pop it (invariant I3).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Attach = 0x01,
    Detach = 0x02,
    Map = 0x03,
    Unmap = 0x04,
    Release = 0x05,
    BeginCpuAccess = 0x06,
    EndCpuAccess = 0x07,
    Kmap = 0x08,
    Kunmap = 0x09,
    KmapAtomic = 0x0a,
    KunmapAtomic = 0x0b,
    /// Explicitly unsupported; the exporter logs and acknowledges with an
    /// error rather than crashing on receipt.
    Mmap = 0x0c,
    Vmap = 0x0d,
    Vunmap = 0x0e,
}

impl OpCode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x01 => Some(Self::Attach),
            0x02 => Some(Self::Detach),
            0x03 => Some(Self::Map),
            0x04 => Some(Self::Unmap),
            0x05 => Some(Self::Release),
            0x06 => Some(Self::BeginCpuAccess),
            0x07 => Some(Self::EndCpuAccess),
            0x08 => Some(Self::Kmap),
            0x09 => Some(Self::Kunmap),
            0x0a => Some(Self::KmapAtomic),
            0x0b => Some(Self::KunmapAtomic),
            0x0c => Some(Self::Mmap),
            0x0d => Some(Self::Vmap),
            0x0e => Some(Self::Vunmap),
            _ => None,
        }
    }

    /// Whether this op pushes a new entry onto the activity stack it
    /// belongs to (as opposed to popping one).
    pub const fn is_push(self) -> bool {
        matches!(self, Self::Attach | Self::Map | Self::Kmap | Self::KmapAtomic | Self::Vmap)
    }
}

/// Response status stamped into a frame's `status` word.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotResponded = 0,
    Processed = 1,
    NeedsFollowUp = 2,
    Error = 3,
}

impl Status {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::NotResponded),
            1 => Some(Self::Processed),
            2 => Some(Self::NeedsFollowUp),
            3 => Some(Self::Error),
            _ => None,
        }
    }
}
