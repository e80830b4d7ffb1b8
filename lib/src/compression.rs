//! On-disk tier codec: a self-describing format header followed by
//! zstd-compressed blocks of packed records. Block headers carry the index
//! range they cover, so a probe can walk headers and decompress only the
//! block containing the index it wants.

use std::io::{self, ErrorKind::InvalidData, Write};

use deku::bitvec::BitView;
use deku::{ctx::Limit, prelude::*};
use log::trace;
use positioned_io::ReadAt;
use zstd::stream::{decode_all, encode_all};

use crate::record::Record;
use crate::types::Tier;

const FORMAT_MAGIC: [u8; 4] = *b"GMTB";
const FORMAT_VERSION: u8 = 1;

// number of records per uncompressed block; each record takes 2 bytes
const BLOCK_ELEMENTS: usize = 1 << 20;

const ZSTD_LEVEL: i32 = 21;

/// Leading header of every tier file.
#[derive(Debug, PartialEq, Eq, Clone, Copy, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct FormatHeader {
    magic: [u8; 4],
    version: u8,
    value_bits: u8,
    remoteness_bits: u8,
    reserved: u8,
    pub tier: i64,
    pub num_positions: i64,
}

impl FormatHeader {
    const BYTE_SIZE: usize = 4 + 4 + 8 + 8;

    #[must_use]
    fn new(tier: Tier, num_positions: i64) -> Self {
        Self {
            magic: FORMAT_MAGIC,
            version: FORMAT_VERSION,
            value_bits: 3,
            remoteness_bits: 10,
            reserved: 0,
            tier,
            num_positions,
        }
    }

    fn validate(&self, expected_tier: Tier) -> io::Result<()> {
        if self.magic != FORMAT_MAGIC {
            return Err(io::Error::new(InvalidData, "bad tier file magic"));
        }
        if self.version != FORMAT_VERSION {
            return Err(io::Error::new(
                InvalidData,
                format!("unsupported tier file version {}", self.version),
            ));
        }
        if self.value_bits != 3 || self.remoteness_bits != 10 {
            return Err(io::Error::new(
                InvalidData,
                "unsupported record bit widths",
            ));
        }
        if self.tier != expected_tier {
            return Err(io::Error::new(
                InvalidData,
                format!("tier file names tier {}, expected {expected_tier}", self.tier),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, DekuRead, DekuWrite)]
#[deku(endian = "little")]
struct BlockHeader {
    pub index_from: u64, // inclusive
    pub index_to: u64,   // exclusive
    pub block_size: u64, // compressed bytes following this header
}

impl BlockHeader {
    const BYTE_SIZE: usize = 8 * 3;

    fn size_including_header(&self) -> usize {
        Self::BYTE_SIZE + self.block_size as usize
    }

    fn contains(&self, index: u64) -> bool {
        self.index_from <= index && index < self.index_to
    }

    const fn num_elements(&self) -> usize {
        (self.index_to - self.index_from) as usize
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, DekuRead, DekuWrite)]
#[deku(endian = "little")]
struct RawRecord {
    bits: u16,
}

// wrapper because `deku` does not implement `DekuWrite` for Vec<T> at the
// container level
#[derive(Debug, PartialEq, Eq, DekuWrite)]
struct RawRecords(Vec<RawRecord>);

#[derive(Debug, PartialEq, Eq, DekuRead, DekuWrite)]
struct Block {
    header: BlockHeader,
    #[deku(count = "header.block_size")]
    compressed: Vec<u8>,
}

impl Block {
    fn new(records: &[Record], index_from: usize) -> io::Result<Self> {
        let raw = RawRecords(
            records
                .iter()
                .map(|r| RawRecord { bits: r.as_raw_u16() })
                .collect(),
        );
        let raw_bytes = raw.to_bytes().unwrap();
        trace!("compressing block of {} records", records.len());
        encode_all(raw_bytes.as_slice(), ZSTD_LEVEL).map(|compressed| Self {
            header: BlockHeader {
                index_from: index_from as u64,
                index_to: (index_from + records.len()) as u64,
                block_size: compressed.len() as u64,
            },
            compressed,
        })
    }

    fn decompress(&self) -> io::Result<Vec<Record>> {
        decode_all(self.compressed.as_slice()).and_then(|raw_bytes| {
            Vec::<RawRecord>::read(
                raw_bytes.view_bits(),
                Limit::new_count(self.header.num_elements()),
            )
            .map_err(|e| io::Error::new(InvalidData, e))
            .map(|(rest, raw)| {
                assert!(rest.is_empty());
                raw.into_iter()
                    .map(|r| Record::from_raw_u16(r.bits))
                    .collect()
            })
        })
    }
}

/// A decompressed block together with the index range it covers, for
/// probe-side caching.
#[derive(Debug)]
pub struct DecodedBlock {
    pub index_from: u64,
    pub index_to: u64,
    pub records: Vec<Record>,
}

impl DecodedBlock {
    #[must_use]
    pub fn contains(&self, index: u64) -> bool {
        self.index_from <= index && index < self.index_to
    }

    #[must_use]
    pub fn record(&self, index: u64) -> Record {
        self.records[(index - self.index_from) as usize]
    }
}

#[derive(Debug)]
pub struct EncoderDecoder<T> {
    inner: T,
}

impl<T> EncoderDecoder<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Write> EncoderDecoder<T> {
    /// Writes the format header and every record, blocked and compressed.
    pub fn compress(&mut self, tier: Tier, records: &[Record]) -> io::Result<()> {
        let header = FormatHeader::new(tier, records.len() as i64);
        self.inner.write_all(&header.to_bytes().unwrap())?;
        for (i, chunk) in records.chunks(BLOCK_ELEMENTS).enumerate() {
            let block = Block::new(chunk, BLOCK_ELEMENTS * i)?;
            self.inner.write_all(&block.to_bytes().unwrap())?;
        }
        Ok(())
    }
}

impl<T: ReadAt> EncoderDecoder<T> {
    pub fn read_format_header(&self, expected_tier: Tier) -> io::Result<FormatHeader> {
        let mut buf = [0_u8; FormatHeader::BYTE_SIZE];
        self.inner.read_exact_at(0, &mut buf)?;
        let header = from_bytes_exact::<FormatHeader>(&buf)?;
        header.validate(expected_tier)?;
        Ok(header)
    }

    fn read_block_header(&self, byte_offset: u64) -> io::Result<BlockHeader> {
        let mut buf = [0_u8; BlockHeader::BYTE_SIZE];
        self.inner.read_exact_at(byte_offset, &mut buf)?;
        from_bytes_exact::<BlockHeader>(&buf)
    }

    fn read_block(&self, byte_offset: u64) -> io::Result<Block> {
        let header = self.read_block_header(byte_offset)?;
        trace!("block of {} bytes at offset {byte_offset}", header.block_size);
        let mut buf = vec![0_u8; header.size_including_header()];
        self.inner.read_exact_at(byte_offset, &mut buf)?;
        from_bytes_exact::<Block>(&buf)
    }

    /// Walks block headers until it finds the one covering `index`, then
    /// decompresses just that block.
    pub fn decode_block_containing(
        &self,
        expected_tier: Tier,
        index: u64,
    ) -> io::Result<DecodedBlock> {
        self.read_format_header(expected_tier)?;
        let mut byte_offset = FormatHeader::BYTE_SIZE as u64;
        loop {
            match self.read_block_header(byte_offset) {
                Ok(header) if header.contains(index) => {
                    let block = self.read_block(byte_offset)?;
                    return Ok(DecodedBlock {
                        index_from: header.index_from,
                        index_to: header.index_to,
                        records: block.decompress()?,
                    });
                }
                Ok(header) => byte_offset += header.size_including_header() as u64,
                // past the last block
                Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "index not found in tier file",
        ))
    }

    /// Decompresses the whole tier.
    pub fn decompress_file(&self, expected_tier: Tier) -> io::Result<Vec<Record>> {
        let header = self.read_format_header(expected_tier)?;
        let mut records = Vec::with_capacity(header.num_positions as usize);
        let mut byte_offset = FormatHeader::BYTE_SIZE as u64;
        loop {
            match self.read_block(byte_offset) {
                Ok(block) => {
                    byte_offset += block.header.size_including_header() as u64;
                    records.extend(block.decompress()?);
                }
                Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err),
            }
        }
        if records.len() as i64 != header.num_positions {
            return Err(io::Error::new(
                InvalidData,
                format!(
                    "tier file holds {} records, header promises {}",
                    records.len(),
                    header.num_positions
                ),
            ));
        }
        Ok(records)
    }
}

fn from_bytes_exact<'a, T: deku::DekuContainerRead<'a>>(buf: &'a [u8]) -> io::Result<T> {
    let ((bytes_not_read, bit_offset), t) =
        T::from_bytes((buf, 0)).map_err(|e| io::Error::new(InvalidData, e))?;
    assert!(bytes_not_read.is_empty());
    assert_eq!(bit_offset, 0);
    Ok(t)
}
