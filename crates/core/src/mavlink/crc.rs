/// CRC-16/MCRF4XX accumulator (the "X.25" checksum used by MAVLink).
///
/// Reflected polynomial `0x8408`, initial value `0xFFFF`, no final xor.
/// Uses a 256-entry lookup table built at compile time.
#[derive(Debug, Clone, Copy)]
pub struct X25Crc {
    crc: u16,
}

const POLY_REFLECTED: u16 = 0x8408;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u16;
        let mut bit = 0;
        while bit < 8 {
            c = if c & 1 != 0 {
                (c >> 1) ^ POLY_REFLECTED
            } else {
                c >> 1
            };
            bit += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

impl X25Crc {
    pub const INIT: u16 = 0xFFFF;

    pub fn new() -> Self {
        Self { crc: Self::INIT }
    }

    #[inline]
    pub fn accumulate(&mut self, byte: u8) {
        let index = (self.crc ^ byte as u16) & 0xFF;
        self.crc = (self.crc >> 8) ^ TABLE[index as usize];
    }

    pub fn accumulate_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.accumulate(b);
        }
    }

    pub fn value(&self) -> u16 {
        self.crc
    }

    /// One-shot checksum of a byte slice.
    pub fn checksum(bytes: &[u8]) -> u16 {
        let mut crc = Self::new();
        crc.accumulate_slice(bytes);
        crc.value()
    }
}

impl Default for X25Crc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(X25Crc::checksum(b"123456789"), 0x6F91);
    }

    #[test]
    fn empty_input_is_init() {
        assert_eq!(X25Crc::checksum(&[]), 0xFFFF);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let data = b"\x09\x00\x01\x01\x00\x00\x00\x00\x00";
        let mut crc = X25Crc::new();
        for &b in data.iter() {
            crc.accumulate(b);
        }
        assert_eq!(crc.value(), X25Crc::checksum(data));
    }

    #[test]
    fn matches_reference_implementation() {
        let samples: [&[u8]; 4] = [
            b"",
            b"a",
            b"The quick brown fox jumps over the lazy dog",
            &[0xFD, 0x09, 0x00, 0x00, 0x2A, 0x01, 0x01, 0x00, 0x00, 0x00],
        ];
        for sample in samples {
            assert_eq!(
                X25Crc::checksum(sample),
                crc16::State::<crc16::MCRF4XX>::calculate(sample),
                "mismatch for {sample:?}"
            );
        }
    }
}
