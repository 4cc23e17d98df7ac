use derive_more::{Display, From, Into};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One of the three dispatch axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// A three-component vector of dispatch quantities (group counts, group sizes, offsets).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, From, Into)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display("({x}, {y}, {z})")]
pub struct Vec3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> Vec3<T> {
    #[inline]
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub const fn splat(value: T) -> Self {
        Self::new(value, value, value)
    }

    #[inline]
    pub const fn to_array(self) -> [T; 3] {
        [self.x, self.y, self.z]
    }

    #[inline]
    pub const fn get(self, axis: Axis) -> T {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    #[inline]
    pub fn set(&mut self, axis: Axis, value: T) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }

    #[inline]
    pub fn map<U: Copy>(self, f: impl Fn(T) -> U) -> Vec3<U> {
        Vec3::new(f(self.x), f(self.y), f(self.z))
    }

    #[inline]
    pub fn zip<U: Copy, V: Copy>(self, other: Vec3<U>, f: impl Fn(T, U) -> V) -> Vec3<V> {
        Vec3::new(f(self.x, other.x), f(self.y, other.y), f(self.z, other.z))
    }
}

impl<T: Copy> From<[T; 3]> for Vec3<T> {
    fn from([x, y, z]: [T; 3]) -> Self {
        Self { x, y, z }
    }
}

impl Vec3<u32> {
    /// Replaces every zero component with 1.
    #[inline]
    pub fn at_least_one(self) -> Self {
        self.map(|v| v.max(1))
    }

    /// Product of all components, widened so it cannot overflow.
    #[inline]
    pub const fn product(self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    #[inline]
    pub fn max_element(self) -> u32 {
        self.x.max(self.y).max(self.z)
    }
}

/// Rounds `value` up to a multiple of `alignment`.
///
/// # Panics
/// If `alignment` is zero.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    assert!(alignment > 0, "alignment must be non-zero");
    value.div_ceil(alignment) * alignment
}

/// Rounds `value` down to a multiple of `alignment`.
#[inline]
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    assert!(alignment > 0, "alignment must be non-zero");
    value / alignment * alignment
}

#[inline]
pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    value % alignment == 0
}

/// A value with the low `bits` bits set.
#[inline]
pub const fn max_n_bit_value(bits: u32) -> u64 {
    match bits {
        0 => 0,
        64.. => u64::MAX,
        _ => (1 << bits) - 1,
    }
}

/// Largest power of two not greater than `value`; zero maps to zero.
#[inline]
pub const fn prev_power_of_two(value: u64) -> u64 {
    match value {
        0 => 0,
        _ => 1 << (63 - value.leading_zeros()),
    }
}

/// Number of bits needed to represent `value`.
#[inline]
pub const fn bit_length(value: u64) -> u32 {
    64 - value.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 32), 96);
        assert_eq!(align_up(7, 3), 9);
        assert_eq!(align_down(95, 32), 64);
        assert!(is_aligned(128, 64));
        assert!(!is_aligned(130, 64));
    }

    #[test]
    fn test_bits() {
        assert_eq!(max_n_bit_value(0), 0);
        assert_eq!(max_n_bit_value(30), 0x3fff_ffff);
        assert_eq!(max_n_bit_value(32), 0xffff_ffff);
        assert_eq!(max_n_bit_value(64), u64::MAX);

        assert_eq!(prev_power_of_two(0), 0);
        assert_eq!(prev_power_of_two(1), 1);
        assert_eq!(prev_power_of_two(15), 8);
        assert_eq!(prev_power_of_two(16), 16);

        assert_eq!(bit_length(0), 0);
        assert_eq!(bit_length(1), 1);
        assert_eq!(bit_length(12), 4);
    }

    #[test]
    fn test_vec3() {
        let v = Vec3::new(4u32, 0, 2);
        assert_eq!(v.at_least_one(), Vec3::new(4, 1, 2));
        assert_eq!(v.product(), 0);
        assert_eq!(v.max_element(), 4);
        assert_eq!(v.get(Axis::Z), 2);
        assert_eq!(Vec3::from([1u32, 2, 3]).to_array(), [1, 2, 3]);
        assert_eq!(format!("{}", Vec3::new(1, 2, 3)), "(1, 2, 3)");
    }
}
