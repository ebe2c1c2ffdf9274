//! Cheetah TPX3 packet accessors.

/// Wrapper around one raw 64-bit TPX3 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tpx3Packet(u64);

/// Bit width of pixel and TDC times after conversion to 1.5625 ns units.
pub const TIME_BITS: u32 = 34;

/// Mask for [`TIME_BITS`]-wide times.
pub const TIME_MASK: u64 = (1 << TIME_BITS) - 1;

impl Tpx3Packet {
    /// Lower 32 bits of a chip header packet (`"TPX3"` little-endian).
    pub const TPX3_HEADER_MAGIC: u64 = 0x3358_5054;

    /// Wraps a raw packet.
    #[inline]
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw packet value.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Top nibble of the packet.
    #[inline]
    #[must_use]
    pub fn packet_type(&self) -> u8 {
        (self.0 >> 60) as u8
    }

    /// Returns true for a chip header packet.
    #[inline]
    #[must_use]
    pub fn is_header(&self) -> bool {
        self.0 & 0xFFFF_FFFF == Self::TPX3_HEADER_MAGIC
    }

    /// Chip id carried by a header packet.
    #[inline]
    #[must_use]
    pub fn chip_id(&self) -> u8 {
        ((self.0 >> 32) & 0xFF) as u8
    }

    /// Returns true for a TDC packet.
    #[inline]
    #[must_use]
    pub fn is_tdc(&self) -> bool {
        !self.is_header() && self.packet_type() == 0x6
    }

    /// Returns true for a pixel hit packet.
    #[inline]
    #[must_use]
    pub fn is_hit(&self) -> bool {
        !self.is_header() && self.packet_type() == 0xB
    }

    /// TDC event subtype (`0xF`/`0xA` TDC1 rising/falling, `0xE`/`0xB` TDC2).
    #[inline]
    #[must_use]
    pub fn tdc_subtype(&self) -> u8 {
        ((self.0 >> 56) & 0x0F) as u8
    }

    /// Coarse TDC timestamp in 3.125 ns units.
    #[inline]
    #[must_use]
    pub fn tdc_coarse(&self) -> u64 {
        (self.0 >> 9) & 0x7_FFFF_FFFF
    }

    /// TDC time in 1.5625 ns units, wrapped to [`TIME_BITS`].
    #[inline]
    #[must_use]
    pub fn tdc_time(&self) -> u64 {
        (self.tdc_coarse() << 1) & TIME_MASK
    }

    /// Local pixel coordinates on the chip.
    #[inline]
    #[must_use]
    pub fn pixel_coordinates(&self) -> (u16, u16) {
        let dcol = ((self.0 & 0x0FE0_0000_0000_0000) >> 52) as u16;
        let spix = ((self.0 & 0x001F_8000_0000_0000) >> 45) as u16;
        let pix = ((self.0 & 0x0000_7000_0000_0000) >> 44) as u16;
        (dcol + (pix >> 2), spix + (pix & 0x3))
    }

    /// Coarse time of arrival (25 ns units).
    #[inline]
    #[must_use]
    pub fn toa(&self) -> u16 {
        ((self.0 >> 30) & 0x3FFF) as u16
    }

    /// Time over threshold (25 ns units).
    #[inline]
    #[must_use]
    pub fn tot(&self) -> u16 {
        ((self.0 >> 20) & 0x3FF) as u16
    }

    /// Fine time of arrival (1.5625 ns units, subtracted).
    #[inline]
    #[must_use]
    pub fn fine_toa(&self) -> u8 {
        ((self.0 >> 16) & 0xF) as u8
    }

    /// SPIDR time stamp extension.
    #[inline]
    #[must_use]
    pub fn spidr_time(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Hit time in 1.5625 ns units, wrapped to [`TIME_BITS`].
    #[inline]
    #[must_use]
    pub fn hit_time(&self) -> u64 {
        let coarse = (u64::from(self.spidr_time()) << 14) | u64::from(self.toa());
        (coarse << 4).wrapping_sub(u64::from(self.fine_toa())) & TIME_MASK
    }
}

/// Forward distance from `from` to `to` on the wrapped time axis.
#[inline]
#[must_use]
pub fn time_delta(from: u64, to: u64) -> u64 {
    to.wrapping_sub(from) & TIME_MASK
}
