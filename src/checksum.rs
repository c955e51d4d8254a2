//! RFC 1071 internet checksum and the IPv4 pseudo-header variant used by TCP and UDP.

/// One's complement sum of 16-bit big-endian words, odd trailing byte padded with zero.
pub fn ones_complement_sum(data: &[u8], initial: u32) -> u32 {
    let mut sum = initial;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        sum = (sum & 0xffff) + (sum >> 16);
    }
    if let Some(&byte) = chunks.remainder().first() {
        sum += (byte as u32) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

pub fn internet_checksum(data: &[u8]) -> u16 {
    fold(ones_complement_sum(data, 0))
}

/// Checksum over the IPv4 pseudo-header (src, dst, zero, protocol, length) followed
/// by `segment`.
pub fn pseudo_header_checksum(src: u32, dst: u32, protocol: u8, segment: &[u8]) -> u16 {
    let mut header = [0u8; 12];
    header[0..4].copy_from_slice(&src.to_be_bytes());
    header[4..8].copy_from_slice(&dst.to_be_bytes());
    header[9] = protocol;
    header[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());
    let sum = ones_complement_sum(&header, 0);
    fold(ones_complement_sum(segment, sum))
}

/// A buffer whose embedded checksum is correct sums to zero.
pub fn verify(data: &[u8]) -> bool {
    internet_checksum(data) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_header_checksum() {
        // 45 00 00 73 00 00 40 00 40 11 [b8 61] c0 a8 00 01 c0 a8 00 c7
        let mut header = vec![
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(internet_checksum(&header), 0xb861);
        header[10] = 0xb8;
        header[11] = 0x61;
        assert!(verify(&header));
    }

    #[test]
    fn odd_length_is_zero_padded() {
        assert_eq!(internet_checksum(&[0x01]), !0x0100);
        assert_eq!(internet_checksum(&[]), 0xffff);
    }
}
