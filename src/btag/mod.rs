//! Block-tag engine: a fixed-layout structured header embedded at the start of every
//! device-sized block, carrying identity/generation/LBA/CRC fields.
//!
//! No direct counterpart exists elsewhere for on-disk tagging; the wire-encoding discipline
//! (explicit `to_le_bytes`/`from_le_bytes`, never a struct cast) follows a fixed little-endian
//! layout and matches the same care around explicit field layout seen in
//! `target/layout_manifest.rs`.

use bitflags::bitflags;
use std::fmt;

/// Magic constant identifying a valid btag.
pub const BTAG_SIGNATURE: u32 = 0x4454_4254; // "DTBT"
pub const BTAG_VERSION: u8 = 1;

/// Wire size of the fixed btag header, in bytes: 128 nominal. The fields below sum to less,
/// the remainder is reserved padding so the struct can grow a new field without shifting
/// everything that follows.
pub const BTAG_SIZE: usize = 128;

const SERIAL_LEN: usize = 16;
const HOSTNAME_LEN: usize = 16;

/// Byte offset of the `crc32` field within the encoded header; must track `Btag::encode`'s
/// field order. The remaining bytes up to `BTAG_SIZE` are zero-filled reserved padding.
// signature + version + pattern_type + flags + lba_or_offset + devid + inode + serial + hostname
// + write_start + write_secs + write_usecs + pattern + generation + process_id + job_id
// + thread_number + device_size + record_index + record_size + record_number + step_offset
// + opaque_type + opaque_size
const CRC32_OFFSET: usize = 4 + 1 + 1 + 2 + 8 + 4 + 8 + SERIAL_LEN + HOSTNAME_LEN + 4 + 4 + 4
    + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 8 + 1 + 2;

bitflags! {
    /// Bit-encoded `pattern_type` field: which pattern source produced this block, plus the
    /// lbdata/timestamp overlay flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PatternTypeFlags: u8 {
        const IOT       = 0b0000_0001;
        const INCR      = 0b0000_0010;
        const PATTERN   = 0b0000_0100;
        const PFILE     = 0b0000_1000;
        const LBDATA    = 0b0001_0000;
        const TIMESTAMP = 0b0010_0000;
    }

    /// `flags` field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BtagFlags: u16 {
        const FILE    = 0b0000_0001;
        const OPAQUE  = 0b0000_0010;
        const PREFIX  = 0b0000_0100;
        const RANDOM  = 0b0000_1000;
        const REVERSE = 0b0001_0000;
    }

    /// Field-level verify mask (`btag_verify=<mask-expr>`). One bit per checked field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VerifyMask: u32 {
        const LBA            = 1 << 0;
        const DEVID          = 1 << 1;
        const INODE          = 1 << 2;
        const SERIAL         = 1 << 3;
        const HOSTNAME       = 1 << 4;
        const SIGNATURE      = 1 << 5;
        const VERSION        = 1 << 6;
        const PATTERN_TYPE   = 1 << 7;
        const FLAGS          = 1 << 8;
        const WRITE_START    = 1 << 9;
        const WRITE_SECS     = 1 << 10;
        const PATTERN        = 1 << 11;
        const GENERATION     = 1 << 12;
        const PROCESS_ID     = 1 << 13;
        const JOB_ID         = 1 << 14;
        const THREAD_NUMBER  = 1 << 15;
        const DEVICE_SIZE    = 1 << 16;
        const RECORD_INDEX   = 1 << 17;
        const RECORD_SIZE    = 1 << 18;
        const RECORD_NUMBER  = 1 << 19;
        const STEP_OFFSET    = 1 << 20;
        const OPAQUE         = 1 << 21;
        const CRC32          = 1 << 22;
    }
}

impl VerifyMask {
    /// Resolve one `btag_verify=<mask-expr>` field name (spec §6) to its flag, if recognized.
    /// `all`/`qv` (quick-verify: signature + crc32 only) are handled by the caller since they
    /// don't map to a single bit.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "lba" | "offset" => Self::LBA,
            "devid" => Self::DEVID,
            "inode" => Self::INODE,
            "serial" => Self::SERIAL,
            "hostname" => Self::HOSTNAME,
            "signature" => Self::SIGNATURE,
            "version" => Self::VERSION,
            "pattern_type" => Self::PATTERN_TYPE,
            "flags" => Self::FLAGS,
            "write_start" => Self::WRITE_START,
            "write_secs" | "write_usecs" => Self::WRITE_SECS,
            "pattern" => Self::PATTERN,
            "generation" => Self::GENERATION,
            "process_id" => Self::PROCESS_ID,
            "job_id" => Self::JOB_ID,
            "thread_number" => Self::THREAD_NUMBER,
            "device_size" => Self::DEVICE_SIZE,
            "record_index" => Self::RECORD_INDEX,
            "record_size" => Self::RECORD_SIZE,
            "record_number" => Self::RECORD_NUMBER,
            "step_offset" => Self::STEP_OFFSET,
            "opaque_data_type" | "opaque_data_size" | "opaque_data" => Self::OPAQUE,
            "crc32" => Self::CRC32,
            _ => return None,
        })
    }

    /// Apply a parsed `btag_verify` expression (`[(name, clear?)]`, see
    /// `config::tokens::parse_mask_expr`) on top of a starting mask. `all` resets to
    /// `Self::all()`; `qv` resets to the quick-verify subset (signature + crc32).
    pub fn apply_expr(mut self, expr: &[(String, bool)]) -> Self {
        for (name, clear) in expr {
            let flag = match name.as_str() {
                "all" => {
                    self = Self::all();
                    continue;
                }
                "qv" => {
                    self = Self::SIGNATURE | Self::CRC32;
                    continue;
                }
                other => match Self::from_name(other) {
                    Some(f) => f,
                    None => continue,
                },
            };
            if *clear {
                self -= flag;
            } else {
                self |= flag;
            }
        }
        self
    }

    /// Default mask: everything except the fields that legitimately vary under random I/O
    /// with overwrites, under iolock, or for files without a SCSI serial.
    pub fn default_for(random_io: bool, iolock_active: bool, has_serial: bool) -> Self {
        let mut mask = Self::all() & !Self::WRITE_SECS;
        if random_io {
            mask -= Self::RECORD_INDEX | Self::RECORD_SIZE | Self::RECORD_NUMBER;
        }
        if iolock_active {
            mask -= Self::THREAD_NUMBER;
        }
        if !has_serial {
            mask -= Self::SERIAL;
        }
        mask
    }
}

/// The fixed btag header. Field order and widths are fixed by the wire layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Btag {
    pub signature: u32,
    pub version: u8,
    pub pattern_type: PatternTypeFlags,
    pub flags: BtagFlags,
    /// LBA (disks) or byte offset (files); which one is indicated by `flags & FILE`.
    pub lba_or_offset: u64,
    pub devid: u32,
    pub inode: u64,
    pub serial: [u8; SERIAL_LEN],
    pub hostname: [u8; HOSTNAME_LEN],
    pub write_start: u32,
    pub write_secs: u32,
    pub write_usecs: u32,
    pub pattern: u32,
    pub generation: u32,
    pub process_id: u32,
    pub job_id: u32,
    pub thread_number: u32,
    pub device_size: u32,
    pub record_index: u32,
    pub record_size: u32,
    pub record_number: u32,
    pub step_offset: u64,
    pub opaque_type: u8,
    pub opaque_size: u16,
    /// Computed by `stamp_buffer`/recomputed by the verifier; zeroed while hashing.
    pub crc32: u32,
}

impl Default for Btag {
    fn default() -> Self {
        Self {
            signature: BTAG_SIGNATURE,
            version: BTAG_VERSION,
            pattern_type: PatternTypeFlags::empty(),
            flags: BtagFlags::empty(),
            lba_or_offset: 0,
            devid: 0,
            inode: 0,
            serial: [0; SERIAL_LEN],
            hostname: [0; HOSTNAME_LEN],
            write_start: 0,
            write_secs: 0,
            write_usecs: 0,
            pattern: 0,
            generation: 1,
            process_id: 0,
            job_id: 0,
            thread_number: 0,
            device_size: 0,
            record_index: 0,
            record_size: 0,
            record_number: 0,
            step_offset: 0,
            opaque_type: 0,
            opaque_size: 0,
            crc32: 0,
        }
    }
}

/// Immutable identity used to build a per-pass btag template (`create_template`).
#[derive(Debug, Clone)]
pub struct BtagIdentity {
    pub devid: u32,
    pub inode: u64,
    pub serial: Vec<u8>,
    pub hostname: Vec<u8>,
    pub process_id: u32,
    pub job_id: u32,
    pub thread_number: u32,
    pub device_size: u32,
    pub step_offset: u64,
    pub file_backed: bool,
}

impl Btag {
    /// `create_template`: initialize immutable-per-pass fields from the worker identity.
    pub fn create_template(identity: &BtagIdentity, generation: u32, pattern: u32, write_start: u32) -> Self {
        let mut serial = [0u8; SERIAL_LEN];
        let n = identity.serial.len().min(SERIAL_LEN);
        serial[..n].copy_from_slice(&identity.serial[..n]);
        let mut hostname = [0u8; HOSTNAME_LEN];
        let n = identity.hostname.len().min(HOSTNAME_LEN);
        hostname[..n].copy_from_slice(&identity.hostname[..n]);

        let mut flags = BtagFlags::empty();
        if identity.file_backed {
            flags |= BtagFlags::FILE;
        }

        Self {
            devid: identity.devid,
            inode: identity.inode,
            serial,
            hostname,
            process_id: identity.process_id,
            job_id: identity.job_id,
            thread_number: identity.thread_number,
            device_size: identity.device_size,
            step_offset: identity.step_offset,
            flags,
            generation,
            pattern,
            write_start,
            ..Default::default()
        }
    }

    /// `update_for_record`: refresh per-block fields prior to writing a block.
    pub fn update_for_record(
        &mut self,
        lba_or_offset: u64,
        record_index: u32,
        record_size: u32,
        record_number: u32,
        write_secs: u32,
        write_usecs: u32,
    ) {
        self.lba_or_offset = lba_or_offset;
        self.record_index = record_index;
        self.record_size = record_size;
        self.record_number = record_number;
        self.write_secs = write_secs;
        self.write_usecs = write_usecs;
    }

    /// Serialize to the wire layout (field-by-field, little-endian). `crc32` is written as-is;
    /// callers that need the hash recomputed should zero it first via `with_crc_zeroed`.
    pub fn encode(&self) -> [u8; BTAG_SIZE] {
        let mut buf = [0u8; BTAG_SIZE];
        let mut w = Writer { buf: &mut buf, pos: 0 };
        w.u32(self.signature);
        w.u8(self.version);
        w.u8(self.pattern_type.bits());
        w.u16(self.flags.bits());
        w.u64(self.lba_or_offset);
        w.u32(self.devid);
        w.u64(self.inode);
        w.bytes(&self.serial);
        w.bytes(&self.hostname);
        w.u32(self.write_start);
        w.u32(self.write_secs);
        w.u32(self.write_usecs);
        w.u32(self.pattern);
        w.u32(self.generation);
        w.u32(self.process_id);
        w.u32(self.job_id);
        w.u32(self.thread_number);
        w.u32(self.device_size);
        w.u32(self.record_index);
        w.u32(self.record_size);
        w.u32(self.record_number);
        w.u64(self.step_offset);
        w.u8(self.opaque_type);
        w.u16(self.opaque_size);
        w.u32(self.crc32);
        buf
    }

    pub fn decode(buf: &[u8; BTAG_SIZE]) -> Self {
        let mut r = Reader { buf, pos: 0 };
        let signature = r.u32();
        let version = r.u8();
        let pattern_type = PatternTypeFlags::from_bits_truncate(r.u8());
        let flags = BtagFlags::from_bits_truncate(r.u16());
        let lba_or_offset = r.u64();
        let devid = r.u32();
        let inode = r.u64();
        let mut serial = [0u8; SERIAL_LEN];
        serial.copy_from_slice(r.bytes(SERIAL_LEN));
        let mut hostname = [0u8; HOSTNAME_LEN];
        hostname.copy_from_slice(r.bytes(HOSTNAME_LEN));
        let write_start = r.u32();
        let write_secs = r.u32();
        let write_usecs = r.u32();
        let pattern = r.u32();
        let generation = r.u32();
        let process_id = r.u32();
        let job_id = r.u32();
        let thread_number = r.u32();
        let device_size = r.u32();
        let record_index = r.u32();
        let record_size = r.u32();
        let record_number = r.u32();
        let step_offset = r.u64();
        let opaque_type = r.u8();
        let opaque_size = r.u16();
        let crc32 = r.u32();
        Self {
            signature,
            version,
            pattern_type,
            flags,
            lba_or_offset,
            devid,
            inode,
            serial,
            hostname,
            write_start,
            write_secs,
            write_usecs,
            pattern,
            generation,
            process_id,
            job_id,
            thread_number,
            device_size,
            record_index,
            record_size,
            record_number,
            step_offset,
            opaque_type,
            opaque_size,
            crc32,
        }
    }
}

struct Writer<'a> {
    buf: &'a mut [u8; BTAG_SIZE],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }
    fn u16(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }
    fn u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }
    fn u64(&mut self, v: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }
    fn bytes(&mut self, v: &[u8]) {
        self.buf[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
    }
}

struct Reader<'a> {
    buf: &'a [u8; BTAG_SIZE],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }
    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }
    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }
    fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }
    fn bytes(&mut self, len: usize) -> &[u8] {
        let v = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        v
    }
}

/// Result of `verify_block`: whether the masked fields and CRC agreed, plus (on failure) the
/// lowest byte offset of disagreement so the dump pointer lands on the first-corrupted byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    Mismatch { first_byte_offset: usize },
}

/// CRC-32 over zlib polynomial 0xEDB88320 reflected, init 0xFFFFFFFF, xorout 0xFFFFFFFF —
/// exactly what `crc32fast` computes (IEEE 802.3 / zlib variant).
pub fn crc32_of(block: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(block);
    hasher.finalize()
}

/// `stamp_buffer`: for each device-sized sub-block of `buf`, update the template, write it at
/// the sub-block start, then compute CRC-32 over the full sub-block.
pub fn stamp_buffer(
    template: &mut Btag,
    buf: &mut [u8],
    device_size: usize,
    first_record_number: u32,
    base_lba_or_offset: u64,
) {
    let mut record_number = first_record_number;
    for (i, chunk) in buf.chunks_mut(device_size).enumerate() {
        let record_index = (i * device_size) as u32;
        let record_size = chunk.len() as u32;
        let lba = base_lba_or_offset + (i * device_size) as u64;
        template.update_for_record(lba, record_index, record_size, record_number, 0, 0);
        let header_len = BTAG_SIZE.min(chunk.len());
        template.crc32 = 0;
        let encoded = template.encode();
        chunk[..header_len].copy_from_slice(&encoded[..header_len]);
        template.crc32 = crc32_of(chunk);
        let encoded = template.encode();
        chunk[..header_len].copy_from_slice(&encoded[..header_len]);
        record_number += 1;
    }
}

/// `verify_block`: bitwise compare the masked fields, then compare CRC (always checked, by
/// recomputing over `received` with `crc32` zeroed).
pub fn verify_block(expected: &Btag, received_block: &[u8], mask: VerifyMask) -> VerifyOutcome {
    if received_block.len() < BTAG_SIZE {
        return VerifyOutcome::Mismatch { first_byte_offset: 0 };
    }
    let mut header = [0u8; BTAG_SIZE];
    header.copy_from_slice(&received_block[..BTAG_SIZE]);
    let mut received = Btag::decode(&header);
    let received_crc = received.crc32;
    received.crc32 = 0;

    let mut scratch = received_block.to_vec();
    scratch[CRC32_OFFSET..CRC32_OFFSET + 4].fill(0);
    let recomputed = crc32_of(&scratch);

    if mask.contains(VerifyMask::CRC32) && recomputed != received_crc {
        return VerifyOutcome::Mismatch { first_byte_offset: CRC32_OFFSET };
    }

    let checks: &[(VerifyMask, bool)] = &[
        (VerifyMask::SIGNATURE, received.signature == expected.signature),
        (VerifyMask::VERSION, received.version == expected.version),
        (VerifyMask::PATTERN_TYPE, received.pattern_type == expected.pattern_type),
        (VerifyMask::FLAGS, received.flags == expected.flags),
        (VerifyMask::LBA, received.lba_or_offset == expected.lba_or_offset),
        (VerifyMask::DEVID, received.devid == expected.devid),
        (VerifyMask::INODE, received.inode == expected.inode),
        (VerifyMask::SERIAL, received.serial == expected.serial),
        (VerifyMask::HOSTNAME, received.hostname == expected.hostname),
        (VerifyMask::WRITE_START, received.write_start == expected.write_start),
        (VerifyMask::WRITE_SECS, received.write_secs == expected.write_secs),
        (VerifyMask::PATTERN, received.pattern == expected.pattern),
        (VerifyMask::GENERATION, received.generation == expected.generation),
        (VerifyMask::PROCESS_ID, received.process_id == expected.process_id),
        (VerifyMask::JOB_ID, received.job_id == expected.job_id),
        (VerifyMask::THREAD_NUMBER, received.thread_number == expected.thread_number),
        (VerifyMask::DEVICE_SIZE, received.device_size == expected.device_size),
        (VerifyMask::RECORD_INDEX, received.record_index == expected.record_index),
        (VerifyMask::RECORD_SIZE, received.record_size == expected.record_size),
        (VerifyMask::RECORD_NUMBER, received.record_number == expected.record_number),
        (VerifyMask::STEP_OFFSET, received.step_offset == expected.step_offset),
        (
            VerifyMask::OPAQUE,
            received.opaque_type == expected.opaque_type && received.opaque_size == expected.opaque_size,
        ),
    ];

    for (flag, ok) in checks {
        if mask.contains(*flag) && !ok {
            return VerifyOutcome::Mismatch { first_byte_offset: field_offset(*flag) };
        }
    }

    VerifyOutcome::Ok
}

/// Byte offset of each field within the encoded header, used to report the *lowest* offset of
/// disagreement when multiple fields differ (spec §4.2 tie-break rule). Must track `encode()`.
fn field_offset(flag: VerifyMask) -> usize {
    match flag {
        VerifyMask::SIGNATURE => 0,
        VerifyMask::VERSION => 4,
        VerifyMask::PATTERN_TYPE => 5,
        VerifyMask::FLAGS => 6,
        VerifyMask::LBA => 8,
        VerifyMask::DEVID => 16,
        VerifyMask::INODE => 20,
        VerifyMask::SERIAL => 28,
        VerifyMask::HOSTNAME => 28 + SERIAL_LEN,
        VerifyMask::WRITE_START => 28 + SERIAL_LEN + HOSTNAME_LEN,
        VerifyMask::WRITE_SECS => 28 + SERIAL_LEN + HOSTNAME_LEN + 4,
        VerifyMask::PATTERN => 28 + SERIAL_LEN + HOSTNAME_LEN + 12,
        VerifyMask::GENERATION => 28 + SERIAL_LEN + HOSTNAME_LEN + 16,
        VerifyMask::PROCESS_ID => 28 + SERIAL_LEN + HOSTNAME_LEN + 20,
        VerifyMask::JOB_ID => 28 + SERIAL_LEN + HOSTNAME_LEN + 24,
        VerifyMask::THREAD_NUMBER => 28 + SERIAL_LEN + HOSTNAME_LEN + 28,
        VerifyMask::DEVICE_SIZE => 28 + SERIAL_LEN + HOSTNAME_LEN + 32,
        VerifyMask::RECORD_INDEX => 28 + SERIAL_LEN + HOSTNAME_LEN + 36,
        VerifyMask::RECORD_SIZE => 28 + SERIAL_LEN + HOSTNAME_LEN + 40,
        VerifyMask::RECORD_NUMBER => 28 + SERIAL_LEN + HOSTNAME_LEN + 44,
        VerifyMask::STEP_OFFSET => 28 + SERIAL_LEN + HOSTNAME_LEN + 48,
        VerifyMask::OPAQUE => 28 + SERIAL_LEN + HOSTNAME_LEN + 56,
        _ => 0,
    }
}

impl fmt::Display for Btag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "btag(lba/off={} gen={} rec#={} job={} thread={})",
            self.lba_or_offset, self.generation, self.record_number, self.job_id, self.thread_number
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> BtagIdentity {
        BtagIdentity {
            devid: 1,
            inode: 42,
            serial: vec![],
            hostname: b"host".to_vec(),
            process_id: 100,
            job_id: 1,
            thread_number: 0,
            device_size: 512,
            step_offset: 0,
            file_backed: true,
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let template = Btag::create_template(&identity(), 1, 0xdead_beef, 1000);
        let encoded = template.encode();
        let decoded = Btag::decode(&encoded);
        assert_eq!(template, decoded);
    }

    #[test]
    fn stamp_then_verify_full_mask_ok() {
        let mut template = Btag::create_template(&identity(), 1, 0xdead_beef, 1000);
        let mut buf = vec![0xAAu8; 512];
        stamp_buffer(&mut template, &mut buf, 512, 1, 0);

        let header = {
            let mut h = [0u8; BTAG_SIZE];
            h.copy_from_slice(&buf[..BTAG_SIZE]);
            Btag::decode(&h)
        };
        let outcome = verify_block(&header, &buf, VerifyMask::all());
        assert_eq!(outcome, VerifyOutcome::Ok);
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let mut template = Btag::create_template(&identity(), 1, 0xdead_beef, 1000);
        let mut buf = vec![0xAAu8; 512];
        stamp_buffer(&mut template, &mut buf, 512, 1, 0);
        buf[500] ^= 0xFF;

        let header = {
            let mut h = [0u8; BTAG_SIZE];
            h.copy_from_slice(&buf[..BTAG_SIZE]);
            Btag::decode(&h)
        };
        let outcome = verify_block(&header, &buf, VerifyMask::all());
        assert_ne!(outcome, VerifyOutcome::Ok);
    }

    #[test]
    fn random_io_mask_excludes_record_fields() {
        let mask = VerifyMask::default_for(true, false, false);
        assert!(!mask.contains(VerifyMask::RECORD_NUMBER));
        assert!(mask.contains(VerifyMask::CRC32));
    }

    #[test]
    fn iolock_mask_excludes_thread_number() {
        let mask = VerifyMask::default_for(false, true, false);
        assert!(!mask.contains(VerifyMask::THREAD_NUMBER));
    }
}
