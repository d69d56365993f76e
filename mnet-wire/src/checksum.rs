//! RFC 1071 Internet checksum, as carried by IP and UDP headers.

/// Computes the ones' complement of the ones' complement sum of `data` taken as big endian
/// 16-bit words. An odd trailing byte is padded with zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    !fold(sum(data, 0))
}

/// Returns `true` if `data` (which includes its own checksum field) sums to `0xffff`.
pub fn verify(data: &[u8]) -> bool {
    fold(sum(data, 0)) == 0xffff
}

#[inline]
fn sum(data: &[u8], mut acc: u32) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        acc += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        acc += (*last as u32) << 8;
    }
    acc
}

#[inline]
const fn fold(mut acc: u32) -> u16 {
    while acc >> 16 != 0 {
        acc = (acc & 0xffff) + (acc >> 16);
    }
    acc as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1071_example() {
        // Example from RFC 1071 section 3: sum of these words is 0xddf2.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn odd_length_is_zero_padded() {
        assert_eq!(internet_checksum(&[0xab]), internet_checksum(&[0xab, 0x00]));
    }

    #[test]
    fn corruption_is_detected() {
        let mut data = vec![1u8, 2, 3, 4, 0, 0];
        let csum = internet_checksum(&data);
        data[4..].copy_from_slice(&csum.to_be_bytes());
        assert!(verify(&data));

        data[0] ^= 0x40;
        assert!(!verify(&data));
    }
}
