use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use time::OffsetDateTime;

/// Minimum version needed to read the ZIP64 records this crate emits.
pub const ZIP64_VERSION: u16 = 45;

/// General purpose flag bit 11: the file name is encoded as UTF-8.
pub const FLAG_UTF8_NAME: u16 = 1 << 11;

/// Header id of the ZIP64 extended-information extra field.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// MS-DOS date/time pair, 2-second granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable timestamp.
    pub const MIN: DosDateTime = DosDateTime {
        time: 0,
        date: (1 << 5) | 1,
    };

    /// 2099-12-31 23:59:58, the latest timestamp this crate hands out.
    pub const MAX: DosDateTime = DosDateTime {
        time: (23 << 11) | (59 << 5) | 29,
        date: (119 << 9) | (12 << 5) | 31,
    };

    /// Encode a calendar date and wall-clock time. Dates outside the
    /// 1980..=2099 range are clamped to the nearest representable value.
    pub fn from_parts(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2099 {
            return Self::MAX;
        }

        let date = (((year - 1980) as u16) << 9) | (u16::from(month) << 5) | u16::from(day);
        let time = (u16::from(hour) << 11) | (u16::from(minute) << 5) | (u16::from(second) / 2);

        Self { time, date }
    }

    /// Encode a filesystem timestamp, interpreted in UTC.
    pub fn from_system_time(time: SystemTime) -> Self {
        let Ok(elapsed) = time.duration_since(UNIX_EPOCH) else {
            return Self::MIN;
        };

        match OffsetDateTime::from_unix_timestamp(elapsed.as_secs() as i64) {
            Ok(utc) => Self::from_parts(
                utc.year(),
                u8::from(utc.month()),
                utc.day(),
                utc.hour(),
                utc.minute(),
                utc.second(),
            ),
            Err(_) => Self::MAX,
        }
    }
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self::MIN
    }
}

/// Local file header. Precedes each entry's payload.
///
/// The 32-bit size fields always hold the overflow sentinel; the real
/// values live in the ZIP64 extra field that follows the name.
pub struct LocalFileHeader<'a> {
    pub method: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub file_name: &'a str,
}

impl LocalFileHeader<'_> {
    pub const SIGNATURE: u32 = 0x0403_4B50;
    pub const FIXED_SIZE: usize = 30;
    pub const EXTRA_SIZE: usize = 20;

    /// Encoded length of a header carrying a name of `name_len` bytes.
    pub fn encoded_len(name_len: usize) -> u64 {
        (Self::FIXED_SIZE + name_len + Self::EXTRA_SIZE) as u64
    }

    pub fn to_bytes(&self) -> Bytes {
        let name = self.file_name.as_bytes();
        let mut buf = BytesMut::with_capacity(Self::FIXED_SIZE + name.len() + Self::EXTRA_SIZE);

        buf.put_u32_le(Self::SIGNATURE);
        buf.put_u16_le(ZIP64_VERSION);
        buf.put_u16_le(FLAG_UTF8_NAME);
        buf.put_u16_le(self.method);
        buf.put_u16_le(self.modified.time);
        buf.put_u16_le(self.modified.date);
        buf.put_u32_le(self.crc32);
        buf.put_u32_le(u32::MAX);
        buf.put_u32_le(u32::MAX);
        buf.put_u16_le(name.len() as u16);
        buf.put_u16_le(Self::EXTRA_SIZE as u16);
        buf.put_slice(name);

        buf.put_u16_le(ZIP64_EXTRA_ID);
        buf.put_u16_le(16);
        buf.put_u64_le(self.uncompressed_size);
        buf.put_u64_le(self.compressed_size);

        buf.freeze()
    }
}

/// Central directory header, one per entry, written after all payloads.
pub struct CentralDirectoryHeader<'a> {
    pub method: u16,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
    pub file_name: &'a str,
}

impl CentralDirectoryHeader<'_> {
    pub const SIGNATURE: u32 = 0x0201_4B50;
    pub const FIXED_SIZE: usize = 46;
    pub const EXTRA_SIZE: usize = 28;

    /// Encoded length of a header carrying a name of `name_len` bytes.
    pub fn encoded_len(name_len: usize) -> u64 {
        (Self::FIXED_SIZE + name_len + Self::EXTRA_SIZE) as u64
    }

    pub fn to_bytes(&self) -> Bytes {
        let name = self.file_name.as_bytes();
        let mut buf = BytesMut::with_capacity(Self::FIXED_SIZE + name.len() + Self::EXTRA_SIZE);

        buf.put_u32_le(Self::SIGNATURE);
        buf.put_u16_le(ZIP64_VERSION);
        buf.put_u16_le(ZIP64_VERSION);
        buf.put_u16_le(FLAG_UTF8_NAME);
        buf.put_u16_le(self.method);
        buf.put_u16_le(self.modified.time);
        buf.put_u16_le(self.modified.date);
        buf.put_u32_le(self.crc32);
        buf.put_u32_le(u32::MAX);
        buf.put_u32_le(u32::MAX);
        buf.put_u16_le(name.len() as u16);
        buf.put_u16_le(Self::EXTRA_SIZE as u16);
        buf.put_u16_le(0); // comment length
        buf.put_u16_le(0); // disk number start
        buf.put_u16_le(0); // internal attributes
        buf.put_u32_le(0); // external attributes
        buf.put_u32_le(u32::MAX);
        buf.put_slice(name);

        buf.put_u16_le(ZIP64_EXTRA_ID);
        buf.put_u16_le(24);
        buf.put_u64_le(self.uncompressed_size);
        buf.put_u64_le(self.compressed_size);
        buf.put_u64_le(self.local_header_offset);

        buf.freeze()
    }
}

/// ZIP64 end of central directory record - 56 bytes.
pub struct Zip64EndOfCentralDirectory {
    pub entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0606_4B50;
    pub const SIZE: usize = 56;

    /// Record size counted from after the size field itself.
    const RECORD_SIZE: u64 = 44;

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);

        buf.put_u32_le(Self::SIGNATURE);
        buf.put_u64_le(Self::RECORD_SIZE);
        buf.put_u16_le(ZIP64_VERSION);
        buf.put_u16_le(ZIP64_VERSION);
        buf.put_u32_le(0); // this disk
        buf.put_u32_le(0); // disk holding the central directory
        buf.put_u64_le(self.entries);
        buf.put_u64_le(self.entries);
        buf.put_u64_le(self.cd_size);
        buf.put_u64_le(self.cd_offset);

        buf.freeze()
    }
}

/// ZIP64 end of central directory locator - 20 bytes.
pub struct Zip64EndOfCentralDirectoryLocator {
    pub eocd64_offset: u64,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIGNATURE: u32 = 0x0706_4B50;
    pub const SIZE: usize = 20;

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);

        buf.put_u32_le(Self::SIGNATURE);
        buf.put_u32_le(0); // disk holding the ZIP64 record
        buf.put_u64_le(self.eocd64_offset);
        buf.put_u32_le(1); // total disks

        buf.freeze()
    }
}

/// Legacy end of central directory record - 22 bytes.
///
/// Every count, size, and offset holds its overflow sentinel; readers
/// find the true values in the ZIP64 record.
pub struct EndOfCentralDirectory;

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0605_4B50;
    pub const SIZE: usize = 22;

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);

        buf.put_u32_le(Self::SIGNATURE);
        buf.put_u16_le(0); // this disk
        buf.put_u16_le(0); // disk holding the central directory
        buf.put_u16_le(u16::MAX);
        buf.put_u16_le(u16::MAX);
        buf.put_u32_le(u32::MAX);
        buf.put_u32_le(u32::MAX);
        buf.put_u16_le(0); // comment length

        buf.freeze()
    }
}
