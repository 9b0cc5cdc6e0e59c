//! Lock usage bits
//!
//! Every class accumulates the set of roles it has been observed in. The
//! IRQ roles come in pairs: "used in" an interrupt context (the class is
//! IRQ-safe) and "enabled" meaning the class was held with that interrupt
//! context enabled (the class is IRQ-unsafe). A class carrying both halves
//! of a pair, directly or through the dependency graph, can deadlock against
//! its own interrupt handler.

use core::fmt;

bitflags::bitflags! {
    /// Set of usage bits carried by a lock class
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LockUsage: u32 {
        const USED_IN_HARDIRQ = 1 << 0;
        const USED_IN_SOFTIRQ = 1 << 1;
        const ENABLED_HARDIRQ = 1 << 2;
        const ENABLED_SOFTIRQ = 1 << 3;
        const USED_IN_HARDIRQ_READ = 1 << 4;
        const USED_IN_SOFTIRQ_READ = 1 << 5;
        const ENABLED_HARDIRQ_READ = 1 << 6;
        const ENABLED_SOFTIRQ_READ = 1 << 7;
        const USED = 1 << 8;
    }
}

/// Interrupt context a usage bit refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqKind {
    /// Hardware interrupt handlers
    Hard,
    /// Software interrupt (bottom half) handlers
    Soft,
}

impl IrqKind {
    /// Short name used in reports ("hard" / "soft")
    pub const fn name(self) -> &'static str {
        match self {
            IrqKind::Hard => "hard",
            IrqKind::Soft => "soft",
        }
    }
}

/// One usage bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UsageBit {
    UsedInHardirq = 0,
    UsedInSoftirq = 1,
    EnabledHardirq = 2,
    EnabledSoftirq = 3,
    UsedInHardirqRead = 4,
    UsedInSoftirqRead = 5,
    EnabledHardirqRead = 6,
    EnabledSoftirqRead = 7,
    Used = 8,
}

/// Number of usage bits (and of per-class usage traces)
pub const NR_USAGE_BITS: usize = 9;

impl UsageBit {
    /// All bits, in index order
    pub const ALL: [UsageBit; NR_USAGE_BITS] = [
        UsageBit::UsedInHardirq,
        UsageBit::UsedInSoftirq,
        UsageBit::EnabledHardirq,
        UsageBit::EnabledSoftirq,
        UsageBit::UsedInHardirqRead,
        UsageBit::UsedInSoftirqRead,
        UsageBit::EnabledHardirqRead,
        UsageBit::EnabledSoftirqRead,
        UsageBit::Used,
    ];

    /// "Used in `kind` IRQ context" bit
    pub const fn used_in(kind: IrqKind, read: bool) -> Self {
        match (kind, read) {
            (IrqKind::Hard, false) => UsageBit::UsedInHardirq,
            (IrqKind::Soft, false) => UsageBit::UsedInSoftirq,
            (IrqKind::Hard, true) => UsageBit::UsedInHardirqRead,
            (IrqKind::Soft, true) => UsageBit::UsedInSoftirqRead,
        }
    }

    /// "Held with `kind` IRQs enabled" bit
    pub const fn enabled(kind: IrqKind, read: bool) -> Self {
        match (kind, read) {
            (IrqKind::Hard, false) => UsageBit::EnabledHardirq,
            (IrqKind::Soft, false) => UsageBit::EnabledSoftirq,
            (IrqKind::Hard, true) => UsageBit::EnabledHardirqRead,
            (IrqKind::Soft, true) => UsageBit::EnabledSoftirqRead,
        }
    }

    /// Index into per-class usage trace arrays
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Single-bit mask
    pub const fn mask(self) -> LockUsage {
        LockUsage::from_bits_retain(1 << (self as u32))
    }

    /// IRQ context this bit describes; `None` for [`UsageBit::Used`]
    pub const fn irq_kind(self) -> Option<IrqKind> {
        match self {
            UsageBit::UsedInHardirq
            | UsageBit::EnabledHardirq
            | UsageBit::UsedInHardirqRead
            | UsageBit::EnabledHardirqRead => Some(IrqKind::Hard),
            UsageBit::UsedInSoftirq
            | UsageBit::EnabledSoftirq
            | UsageBit::UsedInSoftirqRead
            | UsageBit::EnabledSoftirqRead => Some(IrqKind::Soft),
            UsageBit::Used => None,
        }
    }

    /// Whether this is a "used in IRQ" (IRQ-safe) bit
    pub const fn is_used_in(self) -> bool {
        matches!(
            self,
            UsageBit::UsedInHardirq
                | UsageBit::UsedInSoftirq
                | UsageBit::UsedInHardirqRead
                | UsageBit::UsedInSoftirqRead
        )
    }

    /// Whether this bit describes a read acquisition
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            UsageBit::UsedInHardirqRead
                | UsageBit::UsedInSoftirqRead
                | UsageBit::EnabledHardirqRead
                | UsageBit::EnabledSoftirqRead
        )
    }

    /// Human name used in reports
    pub const fn name(self) -> &'static str {
        match self {
            UsageBit::UsedInHardirq => "IN-HARDIRQ-W",
            UsageBit::UsedInSoftirq => "IN-SOFTIRQ-W",
            UsageBit::EnabledHardirq => "HARDIRQ-ON-W",
            UsageBit::EnabledSoftirq => "SOFTIRQ-ON-W",
            UsageBit::UsedInHardirqRead => "IN-HARDIRQ-R",
            UsageBit::UsedInSoftirqRead => "IN-SOFTIRQ-R",
            UsageBit::EnabledHardirqRead => "HARDIRQ-ON-R",
            UsageBit::EnabledSoftirqRead => "SOFTIRQ-ON-R",
            UsageBit::Used => "INITIAL USE",
        }
    }
}

impl fmt::Display for UsageBit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl LockUsage {
    /// Whether `bit` is set
    pub const fn has(self, bit: UsageBit) -> bool {
        self.bits() & bit.mask().bits() != 0
    }

    /// Usage character for one context: `.` untouched, `+` used in the
    /// IRQ context, `-` held with it enabled, `?` both
    pub fn usage_char(self, kind: IrqKind, read: bool) -> char {
        let used = self.has(UsageBit::used_in(kind, read));
        let enabled = self.has(UsageBit::enabled(kind, read));
        match (used, enabled) {
            (false, false) => '.',
            (true, false) => '+',
            (false, true) => '-',
            (true, true) => '?',
        }
    }

    /// Four usage characters: hardirq, softirq, hardirq-read, softirq-read
    pub fn usage_chars(self) -> [char; 4] {
        [
            self.usage_char(IrqKind::Hard, false),
            self.usage_char(IrqKind::Soft, false),
            self.usage_char(IrqKind::Hard, true),
            self.usage_char(IrqKind::Soft, true),
        ]
    }
}
