/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
pub fn aligned_size(value: u32, alignment: u32) -> u32 {
    assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_alignment() {
        assert_eq!(aligned_size(32, 64), 64);
        assert_eq!(aligned_size(64, 64), 64);
        assert_eq!(aligned_size(65, 64), 128);
        assert_eq!(aligned_size(0, 16), 0);
    }

    #[test]
    #[should_panic]
    fn rejects_non_power_of_two_alignment() {
        aligned_size(10, 12);
    }
}
