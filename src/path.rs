//! Implementation paths as bitmask values.
//!
//! A `Path` names one compiled implementation variant, typically tied to a
//! SIMD instruction set. Values are bits and OR together into sets meaning
//! "all of these are compiled; pick one at runtime". Dispatch resolves such a
//! set to a single bit with [`Path::most_significant`].
//!
//! `REFERENCE` and `STANDARD_CPP` exist on every target. The remaining bits
//! are only defined where they make sense, and competing variants on
//! different architectures reuse the same bit positions.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Not};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{ProbeError, Result};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Path(u8);

impl Path {
    /// Absence of any path
    pub const NONE: Path = Path(0);
    /// Minimal standalone implementation, bypassing the tiled machinery.
    /// Meant for testing against.
    pub const REFERENCE: Path = Path(0x1);
    /// Portable implementation of the architecture-specific parts. Also the
    /// fallback when no SIMD path is usable at runtime.
    pub const STANDARD_CPP: Path = Path(0x2);

    /// Widely available subset of ARM NEON
    #[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
    pub const NEON: Path = Path(0x4);
    /// NEON plus the dot-product instructions of newer ARM cores
    #[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
    pub const NEON_DOTPROD: Path = Path(0x8);

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub const SSE42: Path = Path(0x4);
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub const AVX2: Path = Path(0x8);
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub const AVX512: Path = Path(0x10);
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub const AVX_VNNI: Path = Path(0x20);

    pub const fn from_bits(bits: u8) -> Self {
        Path(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn union(self, other: Path) -> Path {
        Path(self.0 | other.0)
    }

    pub const fn intersection(self, other: Path) -> Path {
        Path(self.0 & other.0)
    }

    pub const fn contains(self, other: Path) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when exactly one bit is set
    pub const fn is_single(self) -> bool {
        self.0.is_power_of_two()
    }

    /// Highest set bit of `mask`, i.e. the mask rounded down to a power of two.
    ///
    /// Newer and more specialized instruction sets get higher bits, so this is
    /// the tie-break when several compiled paths are usable at runtime.
    pub const fn most_significant(mask: Path) -> Path {
        if mask.0 == 0 {
            return Path::NONE;
        }
        Path(1 << (u8::BITS - 1 - mask.0.leading_zeros()))
    }

    /// Single-bit members, highest first
    pub fn iter(self) -> impl Iterator<Item = Path> {
        (0..u8::BITS)
            .rev()
            .map(|shift| 1u8 << shift)
            .filter(move |bit| self.0 & bit != 0)
            .map(Path)
    }

    /// Name of a single path defined on this target
    pub fn name(self) -> Option<&'static str> {
        named_paths()
            .find(|(path, _)| *path == self)
            .map(|(_, name)| name)
    }

    fn from_name(name: &str) -> Option<Path> {
        named_paths()
            .find(|(_, known)| known.eq_ignore_ascii_case(name))
            .map(|(path, _)| path)
    }
}

/// Free-function form of [`Path::most_significant`]
pub fn get_most_significant_path(mask: Path) -> Path {
    Path::most_significant(mask)
}

/// Every path worth compiling on this target.
///
/// Dotprod detection is only implemented on Linux, so other ARM targets leave
/// `NEON_DOTPROD` out.
#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
pub const ALL_PATHS: Path = Path::REFERENCE
    .union(Path::STANDARD_CPP)
    .union(Path::NEON)
    .union(Path::NEON_DOTPROD);

#[cfg(any(
    all(target_arch = "arm", target_os = "linux"),
    all(
        any(target_arch = "arm", target_arch = "aarch64"),
        not(target_os = "linux")
    )
))]
pub const ALL_PATHS: Path = Path::REFERENCE
    .union(Path::STANDARD_CPP)
    .union(Path::NEON);

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub const ALL_PATHS: Path = Path::REFERENCE
    .union(Path::STANDARD_CPP)
    .union(Path::SSE42)
    .union(Path::AVX2)
    .union(Path::AVX512)
    .union(Path::AVX_VNNI);

#[cfg(not(any(
    target_arch = "arm",
    target_arch = "aarch64",
    target_arch = "x86",
    target_arch = "x86_64"
)))]
pub const ALL_PATHS: Path = Path::REFERENCE.union(Path::STANDARD_CPP);

const UNIVERSAL_NAMES: &[(Path, &str)] = &[
    (Path::REFERENCE, "reference"),
    (Path::STANDARD_CPP, "standard-cpp"),
];

#[cfg(any(target_arch = "arm", target_arch = "aarch64"))]
const ARCH_NAMES: &[(Path, &str)] = &[(Path::NEON, "neon"), (Path::NEON_DOTPROD, "neon-dotprod")];

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
const ARCH_NAMES: &[(Path, &str)] = &[
    (Path::SSE42, "sse42"),
    (Path::AVX2, "avx2"),
    (Path::AVX512, "avx512"),
    (Path::AVX_VNNI, "avx-vnni"),
];

#[cfg(not(any(
    target_arch = "arm",
    target_arch = "aarch64",
    target_arch = "x86",
    target_arch = "x86_64"
)))]
const ARCH_NAMES: &[(Path, &str)] = &[];

fn named_paths() -> impl Iterator<Item = (Path, &'static str)> {
    UNIVERSAL_NAMES.iter().chain(ARCH_NAMES).copied()
}

impl BitOr for Path {
    type Output = Path;

    fn bitor(self, rhs: Path) -> Path {
        Path(self.0 | rhs.0)
    }
}

impl BitAnd for Path {
    type Output = Path;

    fn bitand(self, rhs: Path) -> Path {
        Path(self.0 & rhs.0)
    }
}

impl BitXor for Path {
    type Output = Path;

    fn bitxor(self, rhs: Path) -> Path {
        Path(self.0 ^ rhs.0)
    }
}

impl Not for Path {
    type Output = Path;

    fn not(self) -> Path {
        Path(!self.0)
    }
}

impl BitOrAssign for Path {
    fn bitor_assign(&mut self, rhs: Path) {
        self.0 |= rhs.0;
    }
}

impl BitAndAssign for Path {
    fn bitand_assign(&mut self, rhs: Path) {
        self.0 &= rhs.0;
    }
}

impl BitXorAssign for Path {
    fn bitxor_assign(&mut self, rhs: Path) {
        self.0 ^= rhs.0;
    }
}

impl fmt::Display for Path {
    /// Formats as `avx2|standard-cpp`, highest bit first. Bits without a
    /// name on this target print as hex.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (idx, bit) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str("|")?;
            }
            match bit.name() {
                Some(name) => f.write_str(name)?,
                None => write!(f, "{:#04x}", bit.0)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl FromStr for Path {
    type Err = ProbeError;

    /// Parses a `|` or `,` separated list of path names. `all` and `none`
    /// are accepted as shorthands.
    fn from_str(value: &str) -> Result<Self> {
        let mut mask = Path::NONE;
        for token in value.split(['|', ',']) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            mask |= match token.to_ascii_lowercase().as_str() {
                "all" => ALL_PATHS,
                "none" => Path::NONE,
                other => Path::from_name(other).ok_or_else(|| ProbeError::unknown_path(other))?,
            };
        }
        Ok(mask)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
