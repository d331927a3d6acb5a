//! # Memory Protection Unit
//!
//! One-shot configuration of the ARMv7-M (PMSAv7) MPU from a declarative
//! region table. Each [`ProtectionRegion`] is a fixed-size descriptor that
//! encodes to exactly one RBAR/RASR pair; [`configure`] applies the whole
//! table with the MPU disabled and turns it back on only after every region
//! reads back as enabled.
//!
//! ## Register encoding
//!
//! ```text
//! RBAR  [31:5] ADDR   [4] VALID   [3:0] REGION
//! RASR  [28] XN  [26:24] AP  [21:19] TEX  [18] S  [17] C  [16] B
//!       [15:8] SRD  [5:1] SIZE  [0] ENABLE
//! CTRL  [2] PRIVDEFENA  [1] HFNMIENA  [0] ENABLE
//! ```
//!
//! A region covers `2^(SIZE + 1)` bytes and its base must be aligned to
//! that size. Both constraints are checked when the descriptor is built, so
//! a bad entry in `config::PROTECTION_REGIONS` fails the build instead of
//! silently misconfiguring protection.

/// Regions implemented by the Cortex-M7 MPU.
pub const MPU_REGIONS: u8 = 8;

/// Smallest region the MPU can express.
pub const MIN_REGION_SIZE: u32 = 32;

pub const CTRL_ENABLE: u32 = 1 << 0;
pub const CTRL_HFNMIENA: u32 = 1 << 1;
pub const CTRL_PRIVDEFENA: u32 = 1 << 2;

pub const RBAR_VALID: u32 = 1 << 4;
const RBAR_REGION_MASK: u32 = 0xF;
const RBAR_ADDR_MASK: u32 = !0x1F;

pub const RASR_ENABLE: u32 = 1 << 0;
const RASR_SIZE_SHIFT: u32 = 1;
const RASR_SIZE_MASK: u32 = 0x1F;
const RASR_B: u32 = 1 << 16;
const RASR_C: u32 = 1 << 17;
const RASR_S: u32 = 1 << 18;
const RASR_TEX_SHIFT: u32 = 19;
const RASR_TEX_MASK: u32 = 0b111;
const RASR_AP_SHIFT: u32 = 24;
const RASR_AP_MASK: u32 = 0b111;
const RASR_XN: u32 = 1 << 28;

/// Access permissions (the RASR AP field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// No access at any privilege level.
    NoAccess,
    /// Privileged read-write; unprivileged accesses fault.
    PrivilegedRwOnly,
    /// Privileged read-write; unprivileged read-only.
    PrivilegedRwUnprivilegedRo,
    /// Read-write at both levels.
    FullAccess,
    /// Privileged read-only; unprivileged accesses fault.
    PrivilegedRoOnly,
    /// Read-only at both levels.
    ReadOnly,
}

impl AccessPolicy {
    pub const fn bits(self) -> u32 {
        match self {
            AccessPolicy::NoAccess => 0b000,
            AccessPolicy::PrivilegedRwOnly => 0b001,
            AccessPolicy::PrivilegedRwUnprivilegedRo => 0b010,
            AccessPolicy::FullAccess => 0b011,
            AccessPolicy::PrivilegedRoOnly => 0b101,
            AccessPolicy::ReadOnly => 0b110,
        }
    }

    /// Decode an AP field. `0b100` is reserved; `0b111` aliases read-only.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0b000 => Some(AccessPolicy::NoAccess),
            0b001 => Some(AccessPolicy::PrivilegedRwOnly),
            0b010 => Some(AccessPolicy::PrivilegedRwUnprivilegedRo),
            0b011 => Some(AccessPolicy::FullAccess),
            0b101 => Some(AccessPolicy::PrivilegedRoOnly),
            0b110 | 0b111 => Some(AccessPolicy::ReadOnly),
            _ => None,
        }
    }

    /// Whether unprivileged code may read the region at all.
    pub const fn unprivileged_readable(self) -> bool {
        matches!(
            self,
            AccessPolicy::PrivilegedRwUnprivilegedRo | AccessPolicy::FullAccess | AccessPolicy::ReadOnly
        )
    }
}

/// Memory type and cache policy (the RASR TEX/S/C/B fields).
///
/// See table B3-13 in the ARMv7-M ARM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Normal memory, outer and inner write-through, no write allocate.
    NormalWriteThrough,
    /// Normal memory, outer and inner write-back, read and write allocate.
    NormalWriteBack,
    /// Shareable device memory (peripherals).
    Device,
}

impl MemoryType {
    /// `(TEX, S, C, B)` as register bits.
    const fn attribute_bits(self) -> u32 {
        match self {
            MemoryType::NormalWriteThrough => (0b000 << RASR_TEX_SHIFT) | RASR_C,
            MemoryType::NormalWriteBack => (0b001 << RASR_TEX_SHIFT) | RASR_C | RASR_B,
            MemoryType::Device => (0b000 << RASR_TEX_SHIFT) | RASR_B,
        }
    }

    const fn from_attribute_bits(bits: u32) -> Option<Self> {
        let tex = (bits >> RASR_TEX_SHIFT) & RASR_TEX_MASK;
        let c = bits & RASR_C != 0;
        let b = bits & RASR_B != 0;
        match (tex, c, b) {
            (0b000, true, false) => Some(MemoryType::NormalWriteThrough),
            (0b001, true, true) => Some(MemoryType::NormalWriteBack),
            (0b000, false, true) => Some(MemoryType::Device),
            _ => None,
        }
    }
}

/// One MPU slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionRegion {
    pub region_number: u8,
    pub base_address: u32,
    /// Region covers `2^(size_class + 1)` bytes.
    pub size_class: u8,
    pub access_policy: AccessPolicy,
    pub executable: bool,
    pub memory_type: MemoryType,
    pub enabled: bool,
}

impl ProtectionRegion {
    /// Build an enabled region descriptor.
    ///
    /// # Panics
    /// In const context (the region table) any of these fail the build:
    /// region number outside the MPU, size below 32 bytes or not a power of
    /// two, base not aligned to the size.
    pub const fn new(
        region_number: u8,
        base_address: u32,
        size: u32,
        access_policy: AccessPolicy,
        executable: bool,
        memory_type: MemoryType,
    ) -> Self {
        if region_number >= MPU_REGIONS {
            panic!("MPU region number out of range");
        }
        if size < MIN_REGION_SIZE || !size.is_power_of_two() {
            panic!("MPU region size must be a power of two of at least 32 bytes");
        }
        if base_address & (size - 1) != 0 {
            panic!("MPU region base must be aligned to its size");
        }
        // log2(size) - 1, computed from leading zeros: ARMv7-M has CLZ but no
        // CTZ.
        let size_class = (30 - size.leading_zeros()) as u8;
        Self {
            region_number,
            base_address,
            size_class,
            access_policy,
            executable,
            memory_type,
            enabled: true,
        }
    }

    /// Region size in bytes. Only the 4 GiB class does not fit in a `u32`.
    pub const fn size_bytes(&self) -> u64 {
        1u64 << (self.size_class as u32 + 1)
    }

    /// RBAR contents: base, VALID, and the region number, so the write also
    /// selects the region.
    pub const fn rbar(&self) -> u32 {
        (self.base_address & RBAR_ADDR_MASK) | RBAR_VALID | (self.region_number as u32 & RBAR_REGION_MASK)
    }

    /// RASR contents. No subregions are disabled.
    pub const fn rasr(&self) -> u32 {
        let xn = if self.executable { 0 } else { RASR_XN };
        xn | (self.access_policy.bits() << RASR_AP_SHIFT)
            | self.memory_type.attribute_bits()
            | ((self.size_class as u32 & RASR_SIZE_MASK) << RASR_SIZE_SHIFT)
            | if self.enabled { RASR_ENABLE } else { 0 }
    }

    /// Rebuild a descriptor from register contents. VALID reads as zero on
    /// hardware and is ignored. Returns `None` for encodings this module
    /// never writes (reserved AP, unknown memory type).
    pub const fn decode(region_number: u8, rbar: u32, rasr: u32) -> Option<Self> {
        let access_policy = match AccessPolicy::from_bits((rasr >> RASR_AP_SHIFT) & RASR_AP_MASK) {
            Some(ap) => ap,
            None => return None,
        };
        let memory_type = match MemoryType::from_attribute_bits(rasr & !RASR_S) {
            Some(mt) => mt,
            None => return None,
        };
        Some(Self {
            region_number,
            base_address: rbar & RBAR_ADDR_MASK,
            size_class: ((rasr >> RASR_SIZE_SHIFT) & RASR_SIZE_MASK) as u8,
            access_policy,
            executable: rasr & RASR_XN == 0,
            memory_type,
            enabled: rasr & RASR_ENABLE != 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Register access
// ---------------------------------------------------------------------------

/// Access to the MPU register file.
pub trait MpuRegisters {
    fn read_ctrl(&self) -> u32;
    fn write_ctrl(&mut self, value: u32);
    /// Select the region subsequent RBAR/RASR accesses refer to (RNR).
    fn select(&mut self, region: u8);
    fn read_rbar(&self) -> u32;
    fn write_rbar(&mut self, value: u32);
    fn read_rasr(&self) -> u32;
    fn write_rasr(&mut self, value: u32);
    /// Data then instruction synchronization barrier.
    fn barrier(&mut self);
}

/// The Cortex-M MPU peripheral.
pub struct CortexMpu<'a> {
    mpu: &'a mut cortex_m::peripheral::MPU,
}

impl<'a> CortexMpu<'a> {
    pub fn new(mpu: &'a mut cortex_m::peripheral::MPU) -> Self {
        Self { mpu }
    }
}

// Safety (all writes below): reconfiguring the MPU has no memory-safety
// implications for privileged code, which keeps the default map through
// PRIVDEFENA. The worst outcome of a bad value is a MemManage fault.
impl MpuRegisters for CortexMpu<'_> {
    fn read_ctrl(&self) -> u32 {
        self.mpu.ctrl.read()
    }

    fn write_ctrl(&mut self, value: u32) {
        unsafe { self.mpu.ctrl.write(value) }
    }

    fn select(&mut self, region: u8) {
        unsafe { self.mpu.rnr.write(region as u32) }
    }

    fn read_rbar(&self) -> u32 {
        self.mpu.rbar.read()
    }

    fn write_rbar(&mut self, value: u32) {
        unsafe { self.mpu.rbar.write(value) }
    }

    fn read_rasr(&self) -> u32 {
        self.mpu.rasr.read()
    }

    fn write_rasr(&mut self, value: u32) {
        unsafe { self.mpu.rasr.write(value) }
    }

    fn barrier(&mut self) {
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Apply the region table. Call exactly once, before the scheduler starts.
///
/// 1. MPU off.
/// 2. Per region: select, RBAR (base + VALID), RASR (attributes + ENABLE).
/// 3. MPU on with the privileged default map, only if every region reads
///    back enabled.
/// 4. DSB, ISB.
///
/// Not re-entrant.
pub fn configure<R: MpuRegisters>(regs: &mut R, regions: &[ProtectionRegion]) {
    regs.write_ctrl(0);

    let mut all_enabled = true;
    for region in regions {
        regs.select(region.region_number);
        regs.write_rbar(region.rbar());
        regs.write_rasr(region.rasr());
        all_enabled &= regs.read_rasr() & RASR_ENABLE != 0;
    }

    if all_enabled {
        regs.write_ctrl(CTRL_ENABLE | CTRL_PRIVDEFENA);
    } else {
        log::warn!("MPU left disabled: a region did not report enabled");
    }

    regs.barrier();
}

/// Read a region back from the hardware.
pub fn read_back<R: MpuRegisters>(regs: &mut R, region_number: u8) -> Option<ProtectionRegion> {
    regs.select(region_number);
    ProtectionRegion::decode(region_number, regs.read_rbar(), regs.read_rasr())
}

/// Whether the MPU is globally enabled.
pub fn is_enabled<R: MpuRegisters>(regs: &R) -> bool {
    regs.read_ctrl() & CTRL_ENABLE != 0
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PROTECTION_REGIONS;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Ctrl(u32),
        Select(u8),
        Rbar(u32),
        Rasr(u32),
        Barrier,
    }

    /// Register file that behaves like PMSAv7: an RBAR write with VALID set
    /// also updates RNR, and VALID reads back as zero.
    struct MockMpu {
        ctrl: u32,
        rnr: u8,
        rbar: [u32; MPU_REGIONS as usize],
        rasr: [u32; MPU_REGIONS as usize],
        ops: Vec<Op>,
        /// Simulates a region whose ENABLE bit does not stick.
        stuck_region: Option<u8>,
    }

    impl MockMpu {
        fn new() -> Self {
            Self {
                ctrl: CTRL_ENABLE,
                rnr: 0,
                rbar: [0; MPU_REGIONS as usize],
                rasr: [0; MPU_REGIONS as usize],
                ops: Vec::new(),
                stuck_region: None,
            }
        }
    }

    impl MpuRegisters for MockMpu {
        fn read_ctrl(&self) -> u32 {
            self.ctrl
        }
        fn write_ctrl(&mut self, value: u32) {
            self.ctrl = value;
            self.ops.push(Op::Ctrl(value));
        }
        fn select(&mut self, region: u8) {
            self.rnr = region;
            self.ops.push(Op::Select(region));
        }
        fn read_rbar(&self) -> u32 {
            self.rbar[self.rnr as usize] | self.rnr as u32
        }
        fn write_rbar(&mut self, value: u32) {
            if value & RBAR_VALID != 0 {
                self.rnr = (value & RBAR_REGION_MASK) as u8;
            }
            self.rbar[self.rnr as usize] = value & RBAR_ADDR_MASK;
            self.ops.push(Op::Rbar(value));
        }
        fn read_rasr(&self) -> u32 {
            self.rasr[self.rnr as usize]
        }
        fn write_rasr(&mut self, value: u32) {
            let value = if self.stuck_region == Some(self.rnr) {
                value & !RASR_ENABLE
            } else {
                value
            };
            self.rasr[self.rnr as usize] = value;
            self.ops.push(Op::Rasr(value));
        }
        fn barrier(&mut self) {
            self.ops.push(Op::Barrier);
        }
    }

    #[test]
    fn test_region_table_encoding() {
        let [flash, ram, periph] = PROTECTION_REGIONS;

        // 16 MiB at 0: SIZE=23, AP=010, TEX=000 C=1 B=0, executable.
        assert_eq!(flash.rbar(), 0x0000_0010);
        assert_eq!(flash.rasr(), (0b010 << 24) | (1 << 17) | (23 << 1) | 1);

        // 4 MiB at 0x2040_0000: SIZE=21, AP=010, TEX=001 C=1 B=1, XN.
        assert_eq!(ram.rbar(), 0x2040_0000 | RBAR_VALID | 1);
        assert_eq!(
            ram.rasr(),
            (1 << 28) | (0b010 << 24) | (0b001 << 19) | (1 << 17) | (1 << 16) | (21 << 1) | 1
        );

        // 512 MiB at 0x4000_0000: SIZE=28, AP=001, device, XN.
        assert_eq!(periph.rbar(), 0x4000_0000 | RBAR_VALID | 2);
        assert_eq!(periph.rasr(), (1 << 28) | (0b001 << 24) | (1 << 16) | (28 << 1) | 1);
        assert_eq!(periph.size_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    fn test_size_class_from_bytes() {
        let r = ProtectionRegion::new(3, 0, 32, AccessPolicy::ReadOnly, false, MemoryType::Device);
        assert_eq!(r.size_class, 4);
        let r = ProtectionRegion::new(3, 0, 128 * 1024, AccessPolicy::ReadOnly, false, MemoryType::Device);
        assert_eq!(r.size_class, 16);
        assert_eq!(r.size_bytes(), 128 * 1024);
    }

    #[test]
    #[should_panic]
    fn test_rejects_misaligned_base() {
        // 8 MiB is not aligned at 4 MiB.
        let _ = ProtectionRegion::new(
            0,
            0x0040_0000,
            8 * 1024 * 1024,
            AccessPolicy::PrivilegedRwUnprivilegedRo,
            true,
            MemoryType::NormalWriteThrough,
        );
    }

    #[test]
    #[should_panic]
    fn test_rejects_non_power_of_two() {
        let _ = ProtectionRegion::new(0, 0, 96, AccessPolicy::FullAccess, false, MemoryType::Device);
    }

    #[test]
    #[should_panic]
    fn test_rejects_region_out_of_range() {
        let _ = ProtectionRegion::new(MPU_REGIONS, 0, 32, AccessPolicy::FullAccess, false, MemoryType::Device);
    }

    #[test]
    fn test_configure_round_trip() {
        let mut mpu = MockMpu::new();
        configure(&mut mpu, &PROTECTION_REGIONS);

        assert!(is_enabled(&mpu));
        assert_eq!(mpu.read_ctrl(), CTRL_ENABLE | CTRL_PRIVDEFENA);
        for region in PROTECTION_REGIONS.iter() {
            let back = read_back(&mut mpu, region.region_number);
            assert_eq!(back, Some(*region));
        }
    }

    #[test]
    fn test_configure_ordering() {
        let mut mpu = MockMpu::new();
        configure(&mut mpu, &PROTECTION_REGIONS);
        let ops = &mpu.ops;

        // Disabled first, barrier last, enable immediately before it.
        assert_eq!(ops.first(), Some(&Op::Ctrl(0)));
        assert_eq!(ops.last(), Some(&Op::Barrier));
        assert_eq!(ops[ops.len() - 2], Op::Ctrl(CTRL_ENABLE | CTRL_PRIVDEFENA));

        // Every region: select, RBAR, RASR, in table order.
        let body = &ops[1..ops.len() - 2];
        assert_eq!(body.len(), PROTECTION_REGIONS.len() * 3);
        for (chunk, region) in body.chunks(3).zip(PROTECTION_REGIONS.iter()) {
            assert_eq!(chunk[0], Op::Select(region.region_number));
            assert_eq!(chunk[1], Op::Rbar(region.rbar()));
            assert_eq!(chunk[2], Op::Rasr(region.rasr()));
        }

        // Exactly one enabling CTRL write.
        let enables = ops.iter().filter(|op| matches!(op, Op::Ctrl(v) if v & CTRL_ENABLE != 0)).count();
        assert_eq!(enables, 1);
    }

    #[test]
    fn test_configure_leaves_mpu_off_if_region_not_enabled() {
        let mut mpu = MockMpu::new();
        mpu.stuck_region = Some(1);
        configure(&mut mpu, &PROTECTION_REGIONS);

        assert!(!is_enabled(&mpu));
        assert_eq!(mpu.ops.last(), Some(&Op::Barrier));
        let back = read_back(&mut mpu, 1).unwrap();
        assert!(!back.enabled);
    }

    #[test]
    fn test_decode_rejects_reserved_ap() {
        let rasr = (0b100 << 24) | (4 << 1) | 1;
        assert_eq!(ProtectionRegion::decode(0, 0, rasr), None);
    }

    #[test]
    fn test_access_policy_round_trip() {
        for policy in [
            AccessPolicy::NoAccess,
            AccessPolicy::PrivilegedRwOnly,
            AccessPolicy::PrivilegedRwUnprivilegedRo,
            AccessPolicy::FullAccess,
            AccessPolicy::PrivilegedRoOnly,
            AccessPolicy::ReadOnly,
        ] {
            assert_eq!(AccessPolicy::from_bits(policy.bits()), Some(policy));
        }
        assert!(!AccessPolicy::PrivilegedRwOnly.unprivileged_readable());
        assert!(AccessPolicy::PrivilegedRwUnprivilegedRo.unprivileged_readable());
    }
}
