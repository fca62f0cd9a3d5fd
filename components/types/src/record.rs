use byteorder::{ByteOrder, LittleEndian};
use cumulo_common::{BlockSize, SECTOR_UNIT, WRITE_RECORD_SIZE};

use crate::extent::Extent;

/// One 32-byte slot of a stored object's header region: four little-endian
/// u64 values. Sector and length are in legacy 512-byte units on the wire;
/// [WriteRecord::to_extent] converts them to device blocks. A record with
/// `length == 0` terminates the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub sector: u64,
    pub length: u64,
    pub seq_no: u64,
    pub flag: u64,
}

impl WriteRecord {
    /// Decode one record from the first 32 bytes of `buf`.
    pub fn parse(buf: &[u8]) -> WriteRecord {
        WriteRecord {
            sector: LittleEndian::read_u64(&buf[..8]),
            length: LittleEndian::read_u64(&buf[8..16]),
            seq_no: LittleEndian::read_u64(&buf[16..24]),
            flag: LittleEndian::read_u64(&buf[24..32]),
        }
    }

    /// Encode into the first 32 bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[..8], self.sector);
        LittleEndian::write_u64(&mut buf[8..16], self.length);
        LittleEndian::write_u64(&mut buf[16..24], self.seq_no);
        LittleEndian::write_u64(&mut buf[24..32], self.flag);
    }

    pub fn is_terminator(&self) -> bool { self.length == 0 }

    /// Wire units (512-byte sectors) to device blocks.
    pub fn to_extent(&self, block_size: BlockSize) -> Extent {
        Extent {
            sector: self.sector * SECTOR_UNIT / block_size as u64,
            length: self.length * SECTOR_UNIT / block_size as u64,
            seq_no: self.seq_no,
            flag: self.flag,
        }
    }

    /// Device blocks back to wire units, for records the compactor writes.
    pub fn from_extent(sector: u64, e: &Extent, block_size: BlockSize) -> WriteRecord {
        WriteRecord {
            sector: sector * block_size as u64 / SECTOR_UNIT,
            length: e.length * block_size as u64 / SECTOR_UNIT,
            seq_no: e.seq_no,
            flag: e.flag,
        }
    }
}

/// Iterate the records of a header region until the terminator or the end of
/// the region.
pub fn parse_header(header: &[u8], block_size: BlockSize) -> Vec<Extent> {
    let mut extents = Vec::with_capacity(header.len() / WRITE_RECORD_SIZE / 4);
    for slot in header.chunks_exact(WRITE_RECORD_SIZE) {
        let record = WriteRecord::parse(slot);
        if record.is_terminator() {
            break;
        }
        extents.push(record.to_extent(block_size));
    }
    extents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let record = WriteRecord {
            sector: 128,
            length: 32,
            seq_no: 7,
            flag: 0,
        };
        let mut buf = [0u8; WRITE_RECORD_SIZE];
        record.write_to(&mut buf);
        assert_eq!(WriteRecord::parse(&buf), record);
    }

    #[test]
    fn wire_units_convert_to_blocks() {
        // 4 KiB blocks: 8 wire sectors per block.
        let record = WriteRecord {
            sector: 16,
            length: 32,
            seq_no: 1,
            flag: 0,
        };
        let e = record.to_extent(4096);
        assert_eq!((e.sector, e.length), (2, 4));
        // 512-byte blocks keep wire units as-is.
        let e = record.to_extent(512);
        assert_eq!((e.sector, e.length), (16, 32));
    }

    #[test]
    fn from_extent_inverts_to_extent() {
        let e = Extent {
            sector: 5,
            length: 3,
            seq_no: 9,
            flag: 0,
        };
        let record = WriteRecord::from_extent(e.sector, &e, 4096);
        assert_eq!(record.to_extent(4096), e);
    }

    #[test]
    fn header_parse_stops_at_terminator() {
        let mut header = vec![0u8; 4 * WRITE_RECORD_SIZE];
        WriteRecord {
            sector: 0,
            length: 8,
            seq_no: 1,
            flag: 0,
        }
        .write_to(&mut header[..WRITE_RECORD_SIZE]);
        WriteRecord {
            sector: 64,
            length: 8,
            seq_no: 2,
            flag: 0,
        }
        .write_to(&mut header[WRITE_RECORD_SIZE..2 * WRITE_RECORD_SIZE]);

        let extents = parse_header(&header, 4096);
        assert_eq!(extents.len(), 2);
        assert_eq!(extents[0].sector, 0);
        assert_eq!(extents[1].sector, 8);
        assert_eq!(extents[1].length, 1);
    }
}
