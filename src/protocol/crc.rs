//! CRC-16/USB as carried by DATA packets

const POLY: u16 = 0xa001;

/// Remainder left by running the CRC over data followed by its own CRC
pub const RESIDUE: u16 = 0x4ffe;

/// CRC-16/USB of `data` (init 0xffff, reflected, inverted output)
pub fn crc16(data: &[u8]) -> u16 {
    !update(0xffff, data)
}

fn update(mut crc: u16, data: &[u8]) -> u16 {
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// `true` when the last two bytes of `packet` are the little-endian CRC of
/// the bytes before them.
///
/// Runs the CRC over the whole packet and compares against the residue, so
/// the trailer never has to be split off.
pub fn check(packet: &[u8]) -> bool {
    packet.len() >= 2 && crc16(packet) == RESIDUE
}

/// Append the CRC the way the host controller does
pub fn seal<const N: usize, const M: usize>(data: [u8; N]) -> [u8; M] {
    let mut out = [0u8; M];
    out[..N].copy_from_slice(&data);
    out[N..N + 2].copy_from_slice(&crc16(&data).to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        // Standard check input for CRC-16/USB
        assert_eq!(crc16(b"123456789"), 0xb4c8);
    }

    #[test]
    fn sealed_packet_checks() {
        let packet: [u8; 10] = seal([0x40, 0x01, 0x34, 0x12, 0x00, 0x01, 0x00, 0x00]);
        assert!(check(&packet));
        assert!(!check(&packet[..9]));
        assert!(!check(&[]));
    }

    #[test]
    fn every_single_bit_flip_is_rejected() {
        let packet: [u8; 10] = seal([0x40, 0x05, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00]);
        for bit in 0..packet.len() * 8 {
            let mut corrupted = packet;
            corrupted[bit / 8] ^= 1 << (bit % 8);
            assert!(!check(&corrupted), "flip of bit {} accepted", bit);
        }
    }
}
