//! EDID synthesis for the virtual display
//!
//! Builds the 128-byte EDID handed to the EVDI kernel module on connect. The
//! descriptor starts from a fixed base block describing a generic 1080p60
//! digital monitor and overwrites the preferred-timing descriptor with one
//! computed for the mode the client asked for, so KMS exposes exactly that
//! mode on the virtual connector.
//!
//! The timing math is an approximation of CVT reduced blanking, not a full
//! CVT solver. Clients have only been validated against these approximate
//! values; do not replace them with exact CVT timings without product
//! sign-off.

use tracing::debug;

/// EDID 1.4 base block size. No extension blocks are emitted.
pub const EDID_LENGTH: usize = 128;

/// Offset of the first (preferred-timing) 18-byte descriptor block.
const DTD_OFFSET: usize = 54;

/// Size of a detailed timing descriptor.
const DTD_LENGTH: usize = 18;

// Base EDID for a generic 1080p display. The preferred-timing block and the
// trailing checksum are rewritten per request; everything else is fixed.
#[rustfmt::skip]
const BASE_EDID: [u8; EDID_LENGTH] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,  // Header
    0x63, 0x43,  // Manufacturer ID ("LMC")
    0x01, 0x00,  // Product code
    0x00, 0x00, 0x00, 0x00,  // Serial number
    0x01,  // Week of manufacture
    0x1E,  // Year of manufacture (2020)
    0x01, 0x04,  // EDID version 1.4
    0xA5,  // Digital input, 8 bits per color
    0x34, 0x20,  // Screen size (52cm x 32cm)
    0x78,  // Display gamma 2.2
    0x3A,  // Features: DPMS, preferred timing mode, sRGB
    // Chromaticity coordinates
    0xEE, 0x91, 0xA3, 0x54, 0x4C, 0x99, 0x26, 0x0F, 0x50, 0x54,
    // Established timings
    0x00, 0x00, 0x00,
    // Standard timing information (8 blocks, unused)
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    // Descriptor 1: preferred timing (1920x1080@60Hz, rewritten per request)
    0x02, 0x3A, 0x80, 0x18, 0x71, 0x38, 0x2D, 0x40,
    0x58, 0x2C, 0x45, 0x00, 0x09, 0x25, 0x21, 0x00,
    0x00, 0x1E,
    // Descriptor 2: display name
    0x00, 0x00, 0x00, 0xFC, 0x00,
    b'L', b'a', b'm', b'c', b'o', b' ', b'V', b'i', b'r', b't', b'u', b'a', b'l',
    // Descriptor 3: display range limits
    0x00, 0x00, 0x00, 0xFD, 0x00,
    0x38, 0x4C, 0x1E, 0x53, 0x11, 0x00, 0x0A, 0x20, 0x20, 0x20, 0x20, 0x20, 0x20,
    // Descriptor 4: dummy
    0x00, 0x00, 0x00, 0x10, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    // Extension flag and checksum
    0x00, 0x00,
];

/// Write a detailed timing descriptor for the given mode.
///
/// Approximate reduced-blanking timings: horizontal blanking is width/5,
/// vertical blanking is a fixed 30 lines, sync pulses are fixed 32px/4 lines.
///
/// The descriptor's fields are fixed-width: addressable pixel counts are
/// 12-bit and the pixel clock is stored as 16 bits of 10 kHz units, so the
/// representable bound is 4095 pixels per axis and a 655.35 MHz clock.
/// Out-of-range values wrap silently in release builds.
fn write_dtd(dtd: &mut [u8], width: u32, height: u32, refresh_rate: u32) {
    debug_assert!(dtd.len() >= DTD_LENGTH);
    debug_assert!(width < 4096 && height < 4096);

    let h_blank = width / 5;
    let v_blank = 30u32;
    let h_sync = 32u32;
    let v_sync = 4u32;

    let pixel_clock_khz = ((width + h_blank) * (height + v_blank) * refresh_rate) / 1000;

    // Bytes 0-1: pixel clock in 10 kHz units, little endian
    dtd[0] = (pixel_clock_khz / 10) as u8;
    dtd[1] = ((pixel_clock_khz / 10) >> 8) as u8;

    // Bytes 2-4: horizontal addressable pixels and blanking, low bytes plus
    // shared high-nibble byte
    dtd[2] = width as u8;
    dtd[3] = h_blank as u8;
    dtd[4] = (((width >> 8) & 0x0F) | (((h_blank >> 8) & 0x0F) << 4)) as u8;

    // Bytes 5-7: vertical addressable lines and blanking
    dtd[5] = height as u8;
    dtd[6] = v_blank as u8;
    dtd[7] = (((height >> 8) & 0x0F) | (((v_blank >> 8) & 0x0F) << 4)) as u8;

    // Bytes 8-11: sync pulse offsets and widths
    let h_sync_offset = (h_blank - h_sync) / 2;
    let v_sync_offset = 3u32;

    dtd[8] = h_sync_offset as u8;
    dtd[9] = h_sync as u8;
    dtd[10] = (((v_sync_offset & 0x0F) << 4) | (v_sync & 0x0F)) as u8;
    dtd[11] = (((h_sync_offset >> 8) & 0x03)
        | (((h_sync >> 8) & 0x03) << 2)
        | (((v_sync_offset >> 4) & 0x03) << 4)
        | (((v_sync >> 4) & 0x03) << 6)) as u8;

    // Bytes 12-14: image size (52cm x 32cm, approximate 24" 16:9 panel)
    dtd[12] = 0x20;
    dtd[13] = 0x34;
    dtd[14] = 0x00;

    // Bytes 15-16: no borders
    dtd[15] = 0x00;
    dtd[16] = 0x00;

    // Byte 17: digital separate sync, positive polarity
    dtd[17] = 0x1E;
}

/// Synthesize an EDID for the requested mode.
///
/// The returned buffer always sums to zero modulo 256 (EDID checksum rule)
/// and is always [`EDID_LENGTH`] bytes. When `hdr_requested` is set the
/// output is still an SDR descriptor; the CTA-861 HDR static metadata
/// extension block is not implemented yet.
pub fn synthesize(width: u32, height: u32, refresh_rate: u32, hdr_requested: bool) -> [u8; EDID_LENGTH] {
    let mut edid = BASE_EDID;

    write_dtd(&mut edid[DTD_OFFSET..DTD_OFFSET + DTD_LENGTH], width, height, refresh_rate);

    debug!(
        "Generated EDID with custom DTD for {}x{}@{}Hz",
        width, height, refresh_rate
    );

    if hdr_requested {
        debug!("HDR requested but HDR EDID extension not yet implemented");
    }

    let mut checksum = 0u8;
    for byte in &edid[..EDID_LENGTH - 1] {
        checksum = checksum.wrapping_add(*byte);
    }
    edid[EDID_LENGTH - 1] = 0u8.wrapping_sub(checksum);

    edid
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn byte_sum(edid: &[u8]) -> u32 {
        edid.iter().map(|b| *b as u32).sum::<u32>() % 256
    }

    #[test]
    fn test_checksum_1080p60() {
        let edid = synthesize(1920, 1080, 60, false);
        assert_eq!(byte_sum(&edid), 0);
    }

    #[test]
    fn test_pixel_clock_encoding_1080p60() {
        let edid = synthesize(1920, 1080, 60, false);

        // ((1920 + 384) * (1080 + 30) * 60) / 1000 = 153446 kHz, stored in
        // 10 kHz units little-endian
        let expected = (((1920u32 + 384) * (1080 + 30) * 60) / 1000) / 10;
        let stored = edid[DTD_OFFSET] as u32 | ((edid[DTD_OFFSET + 1] as u32) << 8);
        assert_eq!(stored, expected);
        assert_eq!(stored, 15344);
    }

    #[test]
    fn test_dtd_addressable_pixels_1080p60() {
        let edid = synthesize(1920, 1080, 60, false);
        let dtd = &edid[DTD_OFFSET..DTD_OFFSET + DTD_LENGTH];

        // 1920 = 0x780, h_blank 384 = 0x180
        assert_eq!(dtd[2], 0x80);
        assert_eq!(dtd[3], 0x80);
        assert_eq!(dtd[4], 0x17);

        // 1080 = 0x438, v_blank 30
        assert_eq!(dtd[5], 0x38);
        assert_eq!(dtd[6], 30);
        assert_eq!(dtd[7], 0x04);

        // h_sync_offset = (384 - 32) / 2 = 176, h_sync = 32
        assert_eq!(dtd[8], 176);
        assert_eq!(dtd[9], 32);
        // v_sync_offset 3, v_sync 4
        assert_eq!(dtd[10], 0x34);
        assert_eq!(dtd[11], 0x00);

        // Fixed tail: physical size, borders, sync flags
        assert_eq!(dtd[12], 0x20);
        assert_eq!(dtd[13], 0x34);
        assert_eq!(dtd[17], 0x1E);
    }

    #[test]
    fn test_dtd_high_nibbles_at_wide_mode() {
        let edid = synthesize(3840, 2160, 60, false);
        let dtd = &edid[DTD_OFFSET..DTD_OFFSET + DTD_LENGTH];

        // 3840 = 0xF00, h_blank 768 = 0x300: both land in the upper nibbles
        assert_eq!(dtd[2], 0x00);
        assert_eq!(dtd[3], 0x00);
        assert_eq!(dtd[4], 0x3F);

        // 2160 = 0x870
        assert_eq!(dtd[5], 0x70);
        assert_eq!(dtd[7], 0x08);
    }

    #[test]
    fn test_display_name_descriptor() {
        let edid = synthesize(2560, 1440, 120, false);

        // Second descriptor block (bytes 72-89): display name tag 0xFC
        assert_eq!(&edid[72..77], &[0x00, 0x00, 0x00, 0xFC, 0x00]);
        assert_eq!(&edid[77..90], b"Lamco Virtual");
    }

    #[test]
    fn test_hdr_request_still_produces_valid_sdr_edid() {
        let sdr = synthesize(3840, 2160, 120, false);
        let hdr = synthesize(3840, 2160, 120, true);

        // No extension block is added either way
        assert_eq!(sdr, hdr);
        assert_eq!(hdr[126], 0x00);
        assert_eq!(byte_sum(&hdr), 0);
    }

    proptest! {
        #[test]
        fn prop_checksum_zero_for_all_modes(
            width in 640u32..=3840,
            height in 480u32..=2160,
            refresh in 24u32..=240,
        ) {
            let edid = synthesize(width, height, refresh, false);
            prop_assert_eq!(edid.len(), EDID_LENGTH);
            prop_assert_eq!(byte_sum(&edid), 0);
        }

        #[test]
        fn prop_structure_preserved(
            width in 640u32..=3840,
            height in 480u32..=2160,
            refresh in 24u32..=240,
        ) {
            let edid = synthesize(width, height, refresh, false);

            // Header and everything outside the DTD and checksum match the base
            prop_assert_eq!(&edid[..DTD_OFFSET], &BASE_EDID[..DTD_OFFSET]);
            prop_assert_eq!(
                &edid[DTD_OFFSET + DTD_LENGTH..EDID_LENGTH - 1],
                &BASE_EDID[DTD_OFFSET + DTD_LENGTH..EDID_LENGTH - 1]
            );
        }
    }
}
