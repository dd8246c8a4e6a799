//! Address slices and bit utilities.
//!
//! This module defines strong types for slicing 64-bit physical and virtual
//! addresses. It provides:
//! 1. **Static slices:** `AddrSlice<UP, LOW>` carries its bit extent in the type.
//! 2. **Dynamic slices:** `DynSlice` carries its bit extent in fields, for
//!    extents only known from configuration (block offsets, set counts).
//! 3. **Arithmetic:** wrapping add/sub modulo the slice width, signed distance,
//!    and `splice` for recombining high and low bits.
//!
//! Comparing two dynamic slices with mismatched extents is a programming error
//! and panics.

use std::fmt;
use std::ops::{Add, Sub};

/// Returns the number of bits needed to index `x` items (floor of log2).
///
/// # Panics
///
/// Panics if `x` is zero.
#[inline]
pub fn lg2(x: u64) -> u32 {
    assert!(x > 0, "lg2 of zero");
    63 - x.leading_zeros()
}

/// Returns a mask with the low `bits` bits set.
#[inline]
pub fn bitmask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Returns a mask covering bits `[up, low)`.
#[inline]
pub fn bitmask_range(up: u32, low: u32) -> u64 {
    debug_assert!(up >= low);
    bitmask(up) & !bitmask(low)
}

/// Overlays the low `bits` bits of `lo` onto `hi`.
#[inline]
pub fn splice_bits(hi: u64, lo: u64, bits: u32) -> u64 {
    (hi & !bitmask(bits)) | (lo & bitmask(bits))
}

/// An address slice whose bit extent `[UP, LOW)` is part of the type.
///
/// The contained value is stored shifted down by `LOW` and masked to the slice
/// width, so `AddrSlice::<64, 12>::new(0x1234)` holds page number `0x1`.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddrSlice<const UP: u32, const LOW: u32>(u64);

/// A full 64-bit address (physical or virtual).
pub type Address = AddrSlice<64, 0>;

impl<const UP: u32, const LOW: u32> AddrSlice<UP, LOW> {
    /// Creates a slice from a raw value already expressed in slice units.
    ///
    /// The value is masked to the slice width; out-of-range bits wrap.
    #[inline]
    pub fn new(val: u64) -> Self {
        Self(val & bitmask(UP - LOW))
    }

    /// Extracts this slice from a full address.
    #[inline]
    pub fn from_address(addr: Address) -> Self {
        Self::new(addr.0 >> LOW)
    }

    /// Returns the slice value in slice units (shifted down by `LOW`).
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns the slice value positioned at its absolute bit offset.
    #[inline]
    pub fn absolute(self) -> u64 {
        self.0 << LOW
    }

    /// Returns the upper bound of the extent.
    #[inline]
    pub fn upper_extent(self) -> u32 {
        UP
    }

    /// Returns the lower bound of the extent.
    #[inline]
    pub fn lower_extent(self) -> u32 {
        LOW
    }

    /// Takes the sub-slice `[up, low)`, with bounds relative to this slice.
    ///
    /// # Panics
    ///
    /// Panics if the requested bounds exceed the slice width.
    pub fn slice(self, up: u32, low: u32) -> DynSlice {
        assert!(up <= UP - LOW, "slice upper bound out of range");
        assert!(low <= up, "slice bounds inverted");
        DynSlice::new(LOW + up, LOW + low, self.0 >> low)
    }

    /// Takes the sub-slice above `low` (relative to this slice).
    pub fn slice_upper(self, low: u32) -> DynSlice {
        self.slice(UP - LOW, low)
    }

    /// Takes the sub-slice below `up` (relative to this slice).
    pub fn slice_lower(self, up: u32) -> DynSlice {
        self.slice(up, 0)
    }

    /// Signed distance from `self` to `other`, in slice units.
    ///
    /// # Panics
    ///
    /// Panics if the absolute difference overflows `i64`.
    pub fn offset(self, other: Self) -> i64 {
        let (hi, lo, neg) = if self.0 > other.0 {
            (self.0, other.0, true)
        } else {
            (other.0, self.0, false)
        };
        let diff = hi - lo;
        assert!(diff <= i64::MAX as u64, "address offset overflows");
        if neg {
            -(diff as i64)
        } else {
            diff as i64
        }
    }
}

impl<const UP: u32, const LOW: u32> Add<i64> for AddrSlice<UP, LOW> {
    type Output = Self;

    /// Wrapping addition modulo the slice width.
    fn add(self, delta: i64) -> Self {
        Self::new(self.0.wrapping_add(delta as u64))
    }
}

impl<const UP: u32, const LOW: u32> Sub<i64> for AddrSlice<UP, LOW> {
    type Output = Self;

    fn sub(self, delta: i64) -> Self {
        self + (-delta)
    }
}

impl<const UP: u32, const LOW: u32> fmt::Debug for AddrSlice<UP, LOW> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}[{}:{}]", self.0, UP, LOW)
    }
}

impl<const UP: u32, const LOW: u32> fmt::Display for AddrSlice<UP, LOW> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Address {
    /// Overlays the low `bits` bits of `lo` onto this address.
    #[inline]
    pub fn splice(self, lo: Address, bits: u32) -> Address {
        Address::new(splice_bits(self.0, lo.0, bits))
    }
}

/// An address slice whose bit extent is only known at runtime.
///
/// Used wherever the extent comes from configuration, such as block-aligned
/// comparison (`addr.slice_upper(offset_bits)`) or set indexing.
#[derive(Clone, Copy, Debug)]
pub struct DynSlice {
    value: u64,
    up: u32,
    low: u32,
}

impl DynSlice {
    /// Creates a slice covering absolute bits `[up, low)` holding `val`
    /// (already in slice units).
    ///
    /// # Panics
    ///
    /// Panics if the bounds are inverted or exceed 64 bits.
    pub fn new(up: u32, low: u32, val: u64) -> Self {
        assert!(low <= up && up <= 64, "invalid slice extent [{up}, {low})");
        Self {
            value: val & bitmask(up - low),
            up,
            low,
        }
    }

    /// Returns the slice value in slice units.
    #[inline]
    pub fn value(self) -> u64 {
        self.value
    }

    /// Returns the slice value positioned at its absolute bit offset.
    #[inline]
    pub fn absolute(self) -> u64 {
        self.value << self.low
    }

    /// Returns the upper bound of the extent.
    #[inline]
    pub fn upper_extent(self) -> u32 {
        self.up
    }

    /// Returns the lower bound of the extent.
    #[inline]
    pub fn lower_extent(self) -> u32 {
        self.low
    }

    /// Takes the sub-slice `[up, low)`, with bounds relative to this slice.
    pub fn slice(self, up: u32, low: u32) -> DynSlice {
        assert!(up <= self.up - self.low, "slice upper bound out of range");
        assert!(low <= up, "slice bounds inverted");
        DynSlice::new(self.low + up, self.low + low, self.value >> low)
    }

    /// Takes the sub-slice above `low` (relative to this slice).
    pub fn slice_upper(self, low: u32) -> DynSlice {
        self.slice(self.up - self.low, low)
    }

    /// Takes the sub-slice below `up` (relative to this slice).
    pub fn slice_lower(self, up: u32) -> DynSlice {
        self.slice(up, 0)
    }

    fn check_extent(self, other: Self) {
        assert!(
            self.up == other.up && self.low == other.low,
            "comparing slices with mismatched extents [{}, {}) vs [{}, {})",
            self.up,
            self.low,
            other.up,
            other.low
        );
    }

    /// Signed distance from `self` to `other`, in slice units.
    pub fn offset(self, other: Self) -> i64 {
        self.check_extent(other);
        let (hi, lo, neg) = if self.value > other.value {
            (self.value, other.value, true)
        } else {
            (other.value, self.value, false)
        };
        let diff = hi - lo;
        assert!(diff <= i64::MAX as u64, "address offset overflows");
        if neg {
            -(diff as i64)
        } else {
            diff as i64
        }
    }
}

impl PartialEq for DynSlice {
    /// # Panics
    ///
    /// Panics if the extents do not match; such a comparison is meaningless.
    fn eq(&self, other: &Self) -> bool {
        self.check_extent(*other);
        self.value == other.value
    }
}

impl Eq for DynSlice {}

impl Add<i64> for DynSlice {
    type Output = Self;

    /// Wrapping addition modulo the slice width.
    fn add(self, delta: i64) -> Self {
        DynSlice::new(self.up, self.low, self.value.wrapping_add(delta as u64))
    }
}

impl Sub<i64> for DynSlice {
    type Output = Self;

    fn sub(self, delta: i64) -> Self {
        self + (-delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lg2_and_bitmask() {
        assert_eq!(lg2(1), 0);
        assert_eq!(lg2(64), 6);
        assert_eq!(lg2(4096), 12);
        assert_eq!(bitmask(0), 0);
        assert_eq!(bitmask(6), 0x3f);
        assert_eq!(bitmask(64), u64::MAX);
        assert_eq!(bitmask_range(12, 6), 0xfc0);
    }

    #[test]
    fn test_static_slice_extraction() {
        let addr = Address::new(0xdead_beef);
        let page = AddrSlice::<64, 12>::from_address(addr);
        assert_eq!(page.value(), 0xdead_b);
        let offset = AddrSlice::<12, 0>::from_address(addr);
        assert_eq!(offset.value(), 0xeef);
        assert_eq!(splice_bits(page.absolute(), offset.absolute(), 12), 0xdead_beef);
    }

    #[test]
    fn test_dynamic_slice() {
        let addr = Address::new(0xffff_003f);
        let block = addr.slice_upper(6);
        assert_eq!(block.value(), 0xffff_003f >> 6);
        let set = addr.slice(6 + 3, 6);
        assert_eq!(set.value(), 0);
        assert_eq!(block.lower_extent(), 6);
    }

    #[test]
    fn test_wrapping_arithmetic() {
        let s = DynSlice::new(8, 0, 0xff);
        assert_eq!((s + 1).value(), 0);
        assert_eq!((s - 0x100).value(), 0xff);
        let a = Address::new(10);
        assert_eq!((a + (-4)).value(), 6);
    }

    #[test]
    fn test_offset_sign() {
        let a = Address::new(0x1000);
        let b = Address::new(0x1040);
        assert_eq!(a.offset(b), 0x40);
        assert_eq!(b.offset(a), -0x40);
    }

    #[test]
    #[should_panic(expected = "mismatched extents")]
    fn test_mismatched_extent_comparison_panics() {
        let a = DynSlice::new(12, 6, 1);
        let b = DynSlice::new(12, 0, 1);
        let _ = a == b;
    }

    #[test]
    fn test_splice() {
        let hi = Address::new(0xaaaa_a000);
        let lo = Address::new(0x0000_0555);
        assert_eq!(hi.splice(lo, 12).value(), 0xaaaa_a555);
    }
}
