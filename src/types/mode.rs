//! Access modes and the compatibility lattice.
//!
//! An access is a *kind* (read, write, read-write, scratch, reduction) plus
//! orthogonal *flags*. The kind forms a small subsumption lattice
//! (`None ⊏ R ⊏ RW`, `None ⊏ W ⊏ RW`; `Scratch` and `Redux` stand apart),
//! and two concurrent accesses to the same handle are allowed together only
//! when the pair is *compatible*:
//!
//! - both are reads, or
//! - both carry the COMMUTE flag and neither is scratch or reduction, or
//! - both are reductions.
//!
//! Everything else conflicts and is serialized by the requester queue.
//! Compatibility and join are pure functions over value types; all the
//! locking lives elsewhere.

use core::fmt;

/// The kind of access requested on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessKind {
    /// No access. Only valid as the mode of an idle handle.
    #[default]
    None,
    /// Shared read access.
    Read,
    /// Exclusive write access (previous contents may be discarded).
    Write,
    /// Exclusive read-write access.
    ReadWrite,
    /// Per-task scratch buffer. Serialized against every concurrent access.
    Scratch,
    /// Reduction contribution. Concurrent with other reductions only.
    Redux,
}

impl AccessKind {
    /// Joins two kinds for duplicate-buffer collapsing.
    ///
    /// Returns `None` when the combination has no meaning (for instance a
    /// scratch and a read on the same handle within one task).
    #[must_use]
    pub const fn join(self, other: Self) -> Option<Self> {
        use AccessKind::{None, Read, ReadWrite, Redux, Scratch, Write};
        match (self, other) {
            (None, k) | (k, None) => Some(k),
            (Read, Read) => Some(Read),
            (Write, Write) => Some(Write),
            (Read | Write | ReadWrite, Read | Write | ReadWrite) => Some(ReadWrite),
            (Scratch, Scratch) => Some(Scratch),
            (Redux, Redux) => Some(Redux),
            _ => Option::None,
        }
    }

    /// True for kinds that imply exclusive ownership of the data.
    #[inline]
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite | Self::Scratch)
    }

    const fn label(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Read => "R",
            Self::Write => "W",
            Self::ReadWrite => "RW",
            Self::Scratch => "SCRATCH",
            Self::Redux => "REDUX",
        }
    }
}

/// Orthogonal access flags.
///
/// COMMUTE changes compatibility; SSEND and LOCALITY are pure hints carried
/// through to the executor and ignored by the dependency core.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModeFlags(u8);

impl ModeFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// The access commutes with other COMMUTE accesses on the same handle.
    pub const COMMUTE: Self = Self(1);
    /// Hint: the data should be sent eagerly (non-semantic here).
    pub const SSEND: Self = Self(1 << 1);
    /// Hint: scheduling should favor data locality (non-semantic here).
    pub const LOCALITY: Self = Self(1 << 2);

    /// Returns the union of two flag sets.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns the intersection of two flag sets.
    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// True if every flag in `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no flag is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ModeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut emit = |name: &str, f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            write!(f, "{name}")
        };
        if self.contains(Self::COMMUTE) {
            emit("COMMUTE", f)?;
        }
        if self.contains(Self::SSEND) {
            emit("SSEND", f)?;
        }
        if self.contains(Self::LOCALITY) {
            emit("LOCALITY", f)?;
        }
        if first {
            write!(f, "-")?;
        }
        Ok(())
    }
}

/// A complete access mode: kind plus flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessMode {
    kind: AccessKind,
    flags: ModeFlags,
}

impl AccessMode {
    /// Builds a mode from a kind with no flags.
    #[inline]
    #[must_use]
    pub const fn new(kind: AccessKind) -> Self {
        Self {
            kind,
            flags: ModeFlags::NONE,
        }
    }

    /// The idle mode of a handle with no holders.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self::new(AccessKind::None)
    }

    /// Shared read access.
    #[inline]
    #[must_use]
    pub const fn read() -> Self {
        Self::new(AccessKind::Read)
    }

    /// Exclusive write access.
    #[inline]
    #[must_use]
    pub const fn write() -> Self {
        Self::new(AccessKind::Write)
    }

    /// Exclusive read-write access.
    #[inline]
    #[must_use]
    pub const fn read_write() -> Self {
        Self::new(AccessKind::ReadWrite)
    }

    /// Per-task scratch access.
    #[inline]
    #[must_use]
    pub const fn scratch() -> Self {
        Self::new(AccessKind::Scratch)
    }

    /// Reduction contribution.
    #[inline]
    #[must_use]
    pub const fn redux() -> Self {
        Self::new(AccessKind::Redux)
    }

    /// Returns the same mode with the COMMUTE flag set.
    #[inline]
    #[must_use]
    pub const fn commute(self) -> Self {
        self.with_flags(ModeFlags::COMMUTE)
    }

    /// Returns the same mode with `flags` added.
    #[inline]
    #[must_use]
    pub const fn with_flags(self, flags: ModeFlags) -> Self {
        Self {
            kind: self.kind,
            flags: self.flags.union(flags),
        }
    }

    /// The access kind.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> AccessKind {
        self.kind
    }

    /// The flag set.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> ModeFlags {
        self.flags
    }

    /// True if this is a reduction access.
    #[inline]
    #[must_use]
    pub const fn is_redux(self) -> bool {
        matches!(self.kind, AccessKind::Redux)
    }

    /// True if this access can run concurrently with `other` on one handle.
    #[must_use]
    pub const fn compatible(self, other: Self) -> bool {
        use AccessKind::{Read, Redux, Scratch};
        if matches!(self.kind, Read) && matches!(other.kind, Read) {
            return true;
        }
        if matches!(self.kind, Redux) && matches!(other.kind, Redux) {
            return true;
        }
        if self.flags.contains(ModeFlags::COMMUTE)
            && other.flags.contains(ModeFlags::COMMUTE)
            && !matches!(self.kind, Scratch | Redux)
            && !matches!(other.kind, Scratch | Redux)
        {
            return true;
        }
        false
    }

    /// Joins two modes into the mode that subsumes both.
    ///
    /// Used both to collapse duplicate buffers of one task and to widen a
    /// handle's current mode when a compatible requester joins the holder
    /// cohort. COMMUTE survives only if both sides commute; hint flags are
    /// unioned. Returns `None` for meaningless combinations.
    #[must_use]
    pub const fn join(self, other: Self) -> Option<Self> {
        let kind = match self.kind.join(other.kind) {
            Some(k) => k,
            None => return None,
        };
        let commute = self.flags.contains(ModeFlags::COMMUTE) && other.flags.contains(ModeFlags::COMMUTE);
        let hints = self
            .flags
            .union(other.flags)
            .intersection(ModeFlags::SSEND.union(ModeFlags::LOCALITY));
        let flags = if commute {
            hints.union(ModeFlags::COMMUTE)
        } else {
            hints
        };
        Some(Self { kind, flags })
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.label())?;
        if !self.flags.is_empty() {
            write!(f, "|{:?}", self.flags)?;
        }
        Ok(())
    }
}

impl fmt::Debug for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
