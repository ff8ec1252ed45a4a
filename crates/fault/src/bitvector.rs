use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};
use std::fmt;

/// Widest bit-vector that `Random`, `BitVector` and shifts will produce.
pub const MAX_WIDTH: usize = 1 << 16;

/// A fixed-width unsigned integer as it appears on a circuit port.
///
/// The stored value is always masked to `width` bits, so every arithmetic
/// operation wraps modulo `2^width`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitVector {
    value: BigUint,
    width: usize,
}

fn mask(width: usize) -> BigUint {
    (BigUint::one() << width) - 1u32
}

impl BitVector {
    pub fn new(value: impl Into<BigUint>, width: usize) -> Self {
        let value = value.into() & mask(width);
        Self { value, width }
    }

    pub fn zero(width: usize) -> Self {
        Self {
            value: BigUint::zero(),
            width,
        }
    }

    /// Builds a bit-vector from a signed integer, encoding negative values in
    /// two's complement.
    pub fn from_int(value: &BigInt, width: usize) -> Self {
        match value.sign() {
            Sign::Minus => {
                let modulus = BigInt::from(BigUint::one() << width);
                let wrapped = ((value % &modulus) + &modulus) % &modulus;
                Self::new(wrapped.magnitude().clone(), width)
            }
            _ => Self::new(value.magnitude().clone(), width),
        }
    }

    /// Returns `true` if `value` is representable in `width` bits without
    /// truncation (negative values are accepted in two's complement range).
    pub fn fits(value: &BigInt, width: usize) -> bool {
        match value.sign() {
            Sign::Minus => value.magnitude() <= &(BigUint::one() << width.saturating_sub(1)),
            _ => value.magnitude().bits() <= width as u64,
        }
    }

    pub fn value(&self) -> &BigUint {
        &self.value
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.value.to_u64()
    }

    pub fn to_bigint(&self) -> BigInt {
        BigInt::from(self.value.clone())
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        (index < self.width).then(|| self.value.bit(index as u64))
    }

    /// Zero-extends (or truncates) to `width`.
    pub fn resize(&self, width: usize) -> Self {
        Self::new(self.value.clone(), width)
    }

    pub fn add(&self, rhs: &Self) -> Self {
        let width = self.width.max(rhs.width);
        Self::new(&self.value + &rhs.value, width)
    }

    pub fn sub(&self, rhs: &Self) -> Self {
        let width = self.width.max(rhs.width);
        let modulus = BigUint::one() << width;
        Self::new(&self.value + &modulus - (&rhs.value % &modulus), width)
    }

    pub fn mul(&self, rhs: &Self) -> Self {
        let width = self.width.max(rhs.width);
        Self::new(&self.value * &rhs.value, width)
    }

    /// Unsigned division; `None` on a zero divisor.
    pub fn div(&self, rhs: &Self) -> Option<Self> {
        let width = self.width.max(rhs.width);
        (!rhs.value.is_zero()).then(|| Self::new(&self.value / &rhs.value, width))
    }

    pub fn rem(&self, rhs: &Self) -> Option<Self> {
        let width = self.width.max(rhs.width);
        (!rhs.value.is_zero()).then(|| Self::new(&self.value % &rhs.value, width))
    }

    pub fn and(&self, rhs: &Self) -> Self {
        Self::new(&self.value & &rhs.value, self.width.max(rhs.width))
    }

    pub fn or(&self, rhs: &Self) -> Self {
        Self::new(&self.value | &rhs.value, self.width.max(rhs.width))
    }

    pub fn xor(&self, rhs: &Self) -> Self {
        Self::new(&self.value ^ &rhs.value, self.width.max(rhs.width))
    }

    pub fn shl(&self, amount: usize) -> Self {
        if amount >= self.width {
            return Self::zero(self.width);
        }
        Self::new(&self.value << amount, self.width)
    }

    pub fn shr(&self, amount: usize) -> Self {
        if amount >= self.width {
            return Self::zero(self.width);
        }
        Self::new(&self.value >> amount, self.width)
    }

    pub fn not(&self) -> Self {
        Self::new(&self.value ^ mask(self.width), self.width)
    }

    pub fn neg(&self) -> Self {
        Self::zero(self.width).sub(self)
    }
}

impl fmt::Display for BitVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitVector({}, {})", self.value, self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_masking() {
        let bv = BitVector::new(0x1ffu32, 8);
        assert_eq!(bv.to_u64(), Some(0xff));
        assert_eq!(bv.width(), 8);
    }

    #[test]
    fn test_negative_two_complement() {
        let bv = BitVector::from_int(&BigInt::from(-1), 4);
        assert_eq!(bv.to_u64(), Some(0xf));
        let bv = BitVector::from_int(&BigInt::from(-20), 4);
        assert_eq!(bv.to_u64(), Some(12));
    }

    #[test]
    fn test_fits() {
        assert!(BitVector::fits(&BigInt::from(15), 4));
        assert!(!BitVector::fits(&BigInt::from(16), 4));
        assert!(BitVector::fits(&BigInt::from(-8), 4));
        assert!(!BitVector::fits(&BigInt::from(-9), 4));
    }

    #[test]
    fn test_mixed_width_uses_wider() {
        let a = BitVector::new(15u32, 4);
        let b = BitVector::new(1u32, 8);
        assert_eq!(a.add(&b), BitVector::new(16u32, 8));
    }

    #[test]
    fn test_shift_out_of_range() {
        let a = BitVector::new(5u32, 4);
        assert!(a.shl(4).is_zero());
        assert_eq!(a.shr(2).to_u64(), Some(1));
        assert_eq!(a.bit(2), Some(true));
        assert_eq!(a.bit(4), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(BitVector::new(3u32, 4).to_string(), "BitVector(3, 4)");
    }

    proptest! {
        #[test]
        fn prop_add_wraps(a in 0u64..256, b in 0u64..256) {
            let sum = BitVector::new(a, 8).add(&BitVector::new(b, 8));
            prop_assert_eq!(sum.to_u64(), Some((a + b) % 256));
        }

        #[test]
        fn prop_sub_wraps(a in 0u64..256, b in 0u64..256) {
            let diff = BitVector::new(a, 8).sub(&BitVector::new(b, 8));
            prop_assert_eq!(diff.to_u64(), Some((a + 256 - b) % 256));
        }

        #[test]
        fn prop_not_is_involution(a in 0u64..65536) {
            let bv = BitVector::new(a, 16);
            prop_assert_eq!(bv.not().not(), bv);
        }
    }
}
