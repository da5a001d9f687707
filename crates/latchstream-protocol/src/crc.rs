// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! CRC-16/KERMIT (poly 0x1021 reflected, init 0, no final xor).
//!
//! Words are fed little-endian and the checksum itself is transmitted
//! little-endian, so running a receiver's checksum over a frame *and* its
//! trailing CRC leaves the register at zero. Both ends lean on that: a valid
//! frame resets the running checksum for the next one.

const POLY_REFLECTED: u16 = 0x8408;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLY_REFLECTED
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Running CRC-16/KERMIT register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc16Kermit {
    value: u16,
}

impl Crc16Kermit {
    /// Create a register in its initial (zero) state
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Feed one byte
    #[inline]
    pub fn update_byte(&mut self, byte: u8) {
        let index = ((self.value ^ byte as u16) & 0xFF) as usize;
        self.value = (self.value >> 8) ^ TABLE[index];
    }

    /// Feed a byte slice
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.update_byte(byte);
        }
    }

    /// Feed one word, low byte first
    pub fn update_word(&mut self, word: u16) {
        self.update(&word.to_le_bytes());
    }

    /// Current checksum value
    pub fn value(&self) -> u16 {
        self.value
    }

    /// True once a frame followed by its own CRC has been fed
    pub fn is_valid(&self) -> bool {
        self.value == 0
    }

    /// Return to the initial state
    pub fn reset(&mut self) {
        self.value = 0;
    }
}

/// One-shot checksum of a byte slice
pub fn crc16_kermit(bytes: &[u8]) -> u16 {
    let mut crc = Crc16Kermit::new();
    crc.update(bytes);
    crc.value()
}

/// One-shot checksum of words serialized little-endian
pub fn crc16_kermit_words(words: &[u16]) -> u16 {
    let mut crc = Crc16Kermit::new();
    for &word in words {
        crc.update_word(word);
    }
    crc.value()
}
