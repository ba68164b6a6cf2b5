//! Flag words of the system-call ABI.

bitflags::bitflags! {
    /// Flags accepted by `open`.
    ///
    /// The two low bits select the access mode and are not independent
    /// flags: `0` is read-only, `1` write-only, `2` read-write, `3`
    /// invalid.
    pub struct OpenFlags: u32 {
        /// Write-only access mode bit.
        const WRONLY = 0x001;
        /// Read-write access mode bit.
        const RDWR = 0x002;
        /// Create the file if it does not exist.
        const CREAT = 0x100;
        /// All writes go to the end of the file.
        const APPEND = 0x400;
    }
}

/// Read-only access mode; the absence of both mode bits.
pub const O_RDONLY: OpenFlags = OpenFlags::empty();

bitflags::bitflags! {
    /// Page protection requested by `mmap`.
    pub struct Prot: u32 {
        /// Pages may be read.
        const READ = 0x1;
        /// Pages may be written.
        const WRITE = 0x2;
        /// Pages may be executed.
        const EXEC = 0x4;
    }
}

/// No access; the absence of every protection bit.
pub const PROT_NONE: Prot = Prot::empty();

bitflags::bitflags! {
    /// Mapping flags of `mmap`.
    ///
    /// Exactly one of [`SHARED`](Self::SHARED) and
    /// [`PRIVATE`](Self::PRIVATE) must be given.
    pub struct MapFlags: u32 {
        /// Writes are visible to every mapping of the object.
        const SHARED = 0x1;
        /// Writes are private to this mapping (copy-on-write).
        const PRIVATE = 0x2;
        /// The mapping is not backed by a file.
        const ANON = 0x8;
    }
}
