//! Items that can be retrieved via the `Query` control verb.

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryItem {
    /// Whether the handle is known here as an exported or imported buffer.
    Type = 0,
    /// The VM id of the exporter.
    Exporter = 1,
    /// The VM id of the importer.
    Importer = 2,
    /// Size of the buffer in bytes.
    Size = 3,
    /// Whether any importer currently holds a local fd for this buffer.
    Busy = 4,
    /// Whether the buffer has been marked invalid.
    Unexported = 5,
    /// Whether an unexport has been scheduled but not yet fired.
    DelayedUnexported = 6,
    /// Size in bytes of the caller-supplied `priv` metadata.
    PrivSize = 7,
    /// Copy of the `priv` metadata itself.
    PrivCopy = 8,
}

/// Answer to a [`QueryItem::Type`] query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Exported,
    Imported,
}
