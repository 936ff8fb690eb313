//! Chip identification word decoding and flash geometry lookup.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Address of the debug unit's chip-id register.
pub const CHIP_ID_ADDR: u32 = 0xFFFF_F240;

/// Non-volatile size codes, in KiB. `None` marks reserved codes.
const NVP_SIZES_KIB: [Option<u32>; 16] = [
    Some(0),
    Some(8),
    Some(16),
    Some(32),
    None,
    Some(64),
    None,
    Some(128),
    None,
    Some(256),
    Some(512),
    None,
    Some(1024),
    None,
    Some(2048),
    None,
];

/// SRAM size codes, in KiB.
const SRAM_SIZES_KIB: [Option<u32>; 16] = [
    None,
    Some(1),
    Some(2),
    None,
    Some(112),
    Some(4),
    Some(80),
    Some(160),
    Some(8),
    Some(16),
    Some(32),
    Some(64),
    Some(128),
    Some(256),
    Some(96),
    Some(512),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    At75Cxx,
    At91x40,
    At91x63,
    At91x55,
    At91x42,
    At91x92,
    At91x34,
    Sam7Axx,
    Sam7Sxx,
    Sam7Xc,
    Sam7SExx,
    Sam7Lxx,
    Sam7Xxx,
    Sam9xx,
    Unknown(u8),
}

impl Architecture {
    pub fn from_code(code: u8) -> Self {
        match code {
            0xF0 => Architecture::At75Cxx,
            0x40 => Architecture::At91x40,
            0x63 => Architecture::At91x63,
            0x55 => Architecture::At91x55,
            0x42 => Architecture::At91x42,
            0x92 => Architecture::At91x92,
            0x34 => Architecture::At91x34,
            0x60 => Architecture::Sam7Axx,
            0x70 => Architecture::Sam7Sxx,
            0x71 => Architecture::Sam7Xc,
            0x72 => Architecture::Sam7SExx,
            0x73 => Architecture::Sam7Lxx,
            0x75 => Architecture::Sam7Xxx,
            0x19 => Architecture::Sam9xx,
            other => Architecture::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Architecture::At75Cxx => 0xF0,
            Architecture::At91x40 => 0x40,
            Architecture::At91x63 => 0x63,
            Architecture::At91x55 => 0x55,
            Architecture::At91x42 => 0x42,
            Architecture::At91x92 => 0x92,
            Architecture::At91x34 => 0x34,
            Architecture::Sam7Axx => 0x60,
            Architecture::Sam7Sxx => 0x70,
            Architecture::Sam7Xc => 0x71,
            Architecture::Sam7SExx => 0x72,
            Architecture::Sam7Lxx => 0x73,
            Architecture::Sam7Xxx => 0x75,
            Architecture::Sam9xx => 0x19,
            Architecture::Unknown(c) => c,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Architecture::At75Cxx => "AT75Cxx",
            Architecture::At91x40 => "AT91x40",
            Architecture::At91x63 => "AT91x63",
            Architecture::At91x55 => "AT91x55",
            Architecture::At91x42 => "AT91x42",
            Architecture::At91x92 => "AT91x92",
            Architecture::At91x34 => "AT91x34",
            Architecture::Sam7Axx => "AT91SAM7Axx",
            Architecture::Sam7Sxx => "AT91SAM7Sxx",
            Architecture::Sam7Xc => "AT91SAM7XC",
            Architecture::Sam7SExx => "AT91SAM7SExx",
            Architecture::Sam7Lxx => "AT91SAM7Lxx",
            Architecture::Sam7Xxx => "AT91SAM7Xxx",
            Architecture::Sam9xx => "AT91SAM9xx",
            Architecture::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Unknown(c) => write!(f, "unknown (0x{c:02X})"),
            other => f.write_str(other.name()),
        }
    }
}

impl Serialize for Architecture {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Embedded processor name for the 3-bit eproc code.
pub fn eproc_name(code: u8) -> Option<&'static str> {
    match code {
        1 => Some("ARM946E-S"),
        2 => Some("ARM7TDMI"),
        4 => Some("ARM920T"),
        5 => Some("ARM926EJ-S"),
        _ => None,
    }
}

fn size_label(kib: &Option<u32>) -> String {
    match kib {
        Some(k) => format!("{k} KiB flash"),
        None => "reserved flash size code".to_string(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChipGeometryError {
    #[error(
        "unknown flash geometry for chip id 0x{chip_id:08X} ({arch}, {})",
        size_label(.nv_size_kib)
    )]
    UnknownGeometry {
        chip_id: u32,
        arch: Architecture,
        nv_size_kib: Option<u32>,
    },
}

/// Everything decoded from one chip-id word. Sizes are in KiB; `None` means
/// the chip reported a reserved size code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChipInfo {
    pub chip_id: u32,
    pub version: u8,
    pub eproc: u8,
    pub nv_size_kib: Option<u32>,
    pub nv_size2_kib: Option<u32>,
    pub sram_size_kib: Option<u32>,
    pub arch: Architecture,
    /// Flash page size in bytes.
    pub page_size: u32,
    pub lock_bits: u32,
}

impl ChipInfo {
    pub fn eproc_name(&self) -> Option<&'static str> {
        eproc_name(self.eproc)
    }

    /// Both non-volatile regions together.
    pub fn total_nv_kib(&self) -> Option<u32> {
        Some(self.nv_size_kib? + self.nv_size2_kib?)
    }
}

/// Page size and lock-region count for the chips we know how to flash.
fn geometry(arch: Architecture, nv_kib: u32) -> Option<(u32, u32)> {
    match (arch, nv_kib) {
        (Architecture::Sam7Sxx, 32) => Some((128, 8)),
        (Architecture::Sam7Sxx, 64) => Some((128, 16)),
        (Architecture::Sam7Sxx, 128) => Some((256, 8)),
        (Architecture::Sam7Sxx, 256) => Some((256, 16)),
        (Architecture::Sam7Xxx | Architecture::Sam7Xc, 128) => Some((256, 8)),
        (Architecture::Sam7Xxx | Architecture::Sam7Xc, 256) => Some((256, 16)),
        _ => None,
    }
}

/// Decode a chip-id word.
///
/// Fails when the architecture and total flash size do not map to a known
/// page geometry; there is no safe default page size to fall back on.
pub fn chip_info(word: u32) -> Result<ChipInfo, ChipGeometryError> {
    let field = |shift: u32, mask: u32| ((word >> shift) & mask) as usize;

    let arch = Architecture::from_code(field(20, 0xFF) as u8);
    let nv_size_kib = NVP_SIZES_KIB[field(8, 0xF)];
    let nv_size2_kib = NVP_SIZES_KIB[field(12, 0xF)];

    let mut info = ChipInfo {
        chip_id: word,
        version: field(0, 0x1F) as u8,
        eproc: field(5, 0x7) as u8,
        nv_size_kib,
        nv_size2_kib,
        sram_size_kib: SRAM_SIZES_KIB[field(16, 0xF)],
        arch,
        page_size: 0,
        lock_bits: 0,
    };

    let total = info.total_nv_kib();
    let (page_size, lock_bits) = total.and_then(|kib| geometry(arch, kib)).ok_or(
        ChipGeometryError::UnknownGeometry {
            chip_id: word,
            arch,
            nv_size_kib: total,
        },
    )?;
    info.page_size = page_size;
    info.lock_bits = lock_bits;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(arch: u32, sram: u32, nv2: u32, nv: u32, eproc: u32, version: u32) -> u32 {
        (arch << 20) | (sram << 16) | (nv2 << 12) | (nv << 8) | (eproc << 5) | version
    }

    #[test]
    fn sam7xc_128k_uses_256_byte_pages_and_8_lock_regions() {
        let info = chip_info(word(0x71, 0xA, 0, 0x7, 2, 0)).unwrap();
        assert_eq!(info.arch, Architecture::Sam7Xc);
        assert_eq!(info.nv_size_kib, Some(128));
        assert_eq!(info.sram_size_kib, Some(32));
        assert_eq!(info.page_size, 256);
        assert_eq!(info.lock_bits, 8);
    }

    #[test]
    fn decodes_sam7x256_chip_id() {
        let info = chip_info(0x275B_0940).unwrap();
        assert_eq!(info.arch, Architecture::Sam7Xxx);
        assert_eq!(info.eproc_name(), Some("ARM7TDMI"));
        assert_eq!(info.nv_size_kib, Some(256));
        assert_eq!(info.nv_size2_kib, Some(0));
        assert_eq!(info.sram_size_kib, Some(64));
        assert_eq!((info.page_size, info.lock_bits), (256, 16));
    }

    #[test]
    fn decodes_sam7s64_chip_id() {
        let info = chip_info(0x2709_0540).unwrap();
        assert_eq!(info.arch, Architecture::Sam7Sxx);
        assert_eq!((info.page_size, info.lock_bits), (128, 16));
    }

    #[test]
    fn known_geometries_are_128_or_256_with_8_or_16_locks() {
        for arch in [0x70, 0x71, 0x75] {
            for nv in 0..16 {
                if let Ok(info) = chip_info(word(arch, 0xB, 0, nv, 2, 0)) {
                    assert!([128, 256].contains(&info.page_size));
                    assert!([8, 16].contains(&info.lock_bits));
                }
            }
        }
    }

    #[test]
    fn unmapped_pairs_fail_instead_of_defaulting() {
        // SAM7X with 64 KiB is not in the table.
        let err = chip_info(word(0x75, 0xB, 0, 0x5, 2, 0)).unwrap_err();
        assert_eq!(
            err,
            ChipGeometryError::UnknownGeometry {
                chip_id: word(0x75, 0xB, 0, 0x5, 2, 0),
                arch: Architecture::Sam7Xxx,
                nv_size_kib: Some(64),
            }
        );

        // Known size, architecture we never flash.
        assert!(chip_info(word(0x19, 0xB, 0, 0x9, 5, 0)).is_err());

        // Reserved size code.
        let err = chip_info(word(0x70, 0xB, 0, 0x4, 2, 0)).unwrap_err();
        assert!(matches!(
            err,
            ChipGeometryError::UnknownGeometry {
                nv_size_kib: None,
                ..
            }
        ));
    }

    #[test]
    fn second_region_counts_toward_total_size() {
        // 128 KiB + 128 KiB on a SAM7S resolves as 256 KiB.
        let info = chip_info(word(0x70, 0xB, 0x7, 0x7, 2, 0)).unwrap();
        assert_eq!(info.total_nv_kib(), Some(256));
        assert_eq!(info.page_size, 256);
        assert_eq!(info.lock_bits, 16);
    }

    #[test]
    fn architecture_names_round_trip_through_codes() {
        for code in [0xF0, 0x40, 0x63, 0x55, 0x42, 0x92, 0x34, 0x60, 0x70, 0x71, 0x72, 0x73, 0x75, 0x19] {
            let arch = Architecture::from_code(code);
            assert_ne!(arch, Architecture::Unknown(code));
            assert_eq!(arch.code(), code);
        }
        assert_eq!(Architecture::from_code(0x01).to_string(), "unknown (0x01)");
        assert_eq!(Architecture::Sam7Xc.to_string(), "AT91SAM7XC");
    }
}
