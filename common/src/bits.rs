//! Register bit-field helpers.
//!
//! All helpers operate on 32-bit register words and take the field's bit
//! shift and width, so a backend only has to work out where a pin's field
//! lives.

#[inline(always)]
pub const fn mask(width: u32) -> u32 {
    if width >= 32 { u32::MAX } else { (1 << width) - 1 }
}

#[inline(always)]
pub const fn bit(n: u32) -> u32 {
    1 << n
}

/// Extract a field.
#[inline(always)]
pub const fn field(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & mask(width)
}

/// Replace a field, leaving every other bit of `word` untouched.
#[inline(always)]
pub const fn with_field(word: u32, shift: u32, width: u32, value: u32) -> u32 {
    let m = mask(width) << shift;
    (word & !m) | ((value << shift) & m)
}

/// Write-enable bits for a field in a "hiword mask" register.
///
/// Such registers only latch low-half bits whose enable bit, 16 positions
/// higher, is written as one in the same store.
#[inline(always)]
pub const fn write_enable(shift: u32, width: u32) -> u32 {
    mask(width) << (shift + 16)
}

/// Replace a field in a hiword mask register and set its write-enable bits.
#[inline(always)]
pub const fn with_field_enabled(word: u32, shift: u32, width: u32, value: u32) -> u32 {
    with_field(word & 0xffff, shift, width, value) | write_enable(shift, width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_round_trip_keeps_neighbours() {
        let word = 0b1010_0110_1111;
        let updated = with_field(word, 4, 4, 0b0001);
        assert_eq!(field(updated, 4, 4), 0b0001);
        assert_eq!(updated & 0xf, 0b1111);
        assert_eq!(updated >> 8, 0b1010);
    }

    #[test]
    fn value_wider_than_field_is_truncated() {
        assert_eq!(with_field(0, 3, 3, 0b1111), 0b111 << 3);
    }

    #[test]
    fn full_width_mask() {
        assert_eq!(mask(32), u32::MAX);
        assert_eq!(mask(3), 0b111);
    }

    #[test]
    fn hiword_write_sets_enable_bits() {
        let word = with_field_enabled(0b1100, 2, 2, 0b01);
        assert_eq!(word & 0xffff, 0b0100);
        assert_eq!(word >> 16, 0b1100);
    }
}
