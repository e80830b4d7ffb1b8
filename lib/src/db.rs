//! The value/remoteness store. During a solve, one tier lives in memory as
//! atomic record arrays written concurrently by the workers; a finished
//! tier is flushed to its own file and freed. Probing reads the durable
//! files through a per-probe handle that caches the last decoded block.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};

use log::debug;
use positioned_io::RandomAccessFile;
use rustc_hash::FxHashMap;

use crate::compression::{DecodedBlock, EncoderDecoder};
use crate::error::{Error, Result};
use crate::record::{Record, Remoteness, Value};
use crate::types::{Tier, TierPosition};

pub const MAX_TIER_FILE_NAME_LEN: usize = 31;

/// The in-memory records of the tier currently being solved.
///
/// Values and remotenesses are separate atomic arrays so that workers can
/// arbitrate ownership of a position with a compare-and-set on the value
/// byte alone. The remoteness slot doubles as the undiscovered-winning-
/// moves counter of an undecided position; the final remoteness overwrites
/// it only after the position's value has been claimed.
#[derive(Debug)]
pub struct SolvingTier {
    tier: Tier,
    values: Vec<AtomicU8>,
    remoteness: Vec<AtomicU16>,
}

impl SolvingTier {
    pub fn new(tier: Tier, size: i64) -> Result<Self> {
        let size = usize::try_from(size)
            .map_err(|_| Error::InvalidArgument(format!("tier {tier} has negative size")))?;
        let mut values = Vec::new();
        let mut remoteness = Vec::new();
        values.try_reserve_exact(size).map_err(|_| Error::OutOfMemory)?;
        remoteness.try_reserve_exact(size).map_err(|_| Error::OutOfMemory)?;
        // zero-initialized means (Undecided, 0)
        values.resize_with(size, || AtomicU8::new(0));
        remoteness.resize_with(size, || AtomicU16::new(0));
        Ok(Self {
            tier,
            values,
            remoteness,
        })
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    #[must_use]
    pub fn size(&self) -> i64 {
        self.values.len() as i64
    }

    #[must_use]
    pub fn value(&self, position: i64) -> Value {
        Value::from_raw_u8(self.values[position as usize].load(Ordering::Acquire))
            .unwrap_or_else(|| unreachable!("solving tier holds encoded values"))
    }

    #[must_use]
    pub fn remoteness(&self, position: i64) -> Remoteness {
        self.remoteness[position as usize].load(Ordering::Acquire)
    }

    /// Unconditional write, for phases in which each position has a single
    /// owner.
    pub fn set(&self, position: i64, value: Value, remoteness: Remoteness) {
        self.remoteness[position as usize].store(remoteness, Ordering::Release);
        self.values[position as usize].store(value.as_raw_u8(), Ordering::Release);
    }

    /// Claims an undecided position for `value`. Exactly one concurrent
    /// claimant succeeds; only the winner writes the remoteness.
    pub fn try_claim(&self, position: i64, value: Value, remoteness: Remoteness) -> bool {
        debug_assert!(value != Value::Undecided);
        let claimed = self.values[position as usize]
            .compare_exchange(
                Value::Undecided.as_raw_u8(),
                value.as_raw_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if claimed {
            self.remoteness[position as usize].store(remoteness, Ordering::Release);
        }
        claimed
    }

    /// Seeds the undiscovered-winning-moves counter of an undecided
    /// position (stored in its remoteness slot).
    pub fn init_counter(&self, position: i64, count: u16) {
        self.remoteness[position as usize].store(count, Ordering::Release);
    }

    /// Atomically decrements the counter; returns the remaining count.
    pub fn decrement_counter(&self, position: i64) -> u16 {
        self.remoteness[position as usize].fetch_sub(1, Ordering::AcqRel) - 1
    }

    #[must_use]
    pub fn counter(&self, position: i64) -> u16 {
        self.remoteness[position as usize].load(Ordering::Acquire)
    }

    /// Snapshot for flushing. Positions never labeled read as
    /// (Undecided, 0) regardless of leftover counter scratch.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        (0..self.size())
            .map(|position| {
                let value = self.value(position);
                match value {
                    Value::Undecided => Record::default(),
                    // a drawn position has no finite remoteness
                    Value::Draw => Record::new(Value::Draw, 0),
                    _ => Record::new(value, self.remoteness(position)),
                }
            })
            .collect()
    }
}

/// The durable store. One implementation exists; the solver and manager
/// depend only on this interface.
pub trait Database: Send {
    /// Registers a game-supplied file name (≤ 31 characters) for a tier;
    /// unnamed tiers use the decimal tier integer.
    fn register_tier_name(&mut self, tier: Tier, name: &str) -> Result<()>;

    fn create_solving_tier(&mut self, tier: Tier, size: i64) -> Result<()>;

    /// The tier created by the last `create_solving_tier`.
    fn solving_tier(&self) -> Result<&SolvingTier>;

    /// Durably writes the solving tier. The in-memory tier survives until
    /// `free_solving_tier`.
    fn flush_solving_tier(&mut self) -> Result<()>;

    fn free_solving_tier(&mut self);

    /// Whether a finished tier is already on disk; used to short-circuit
    /// solves unless forced.
    fn is_tier_solved(&self, tier: Tier) -> bool;

    /// Decompresses a whole finished tier.
    fn load_tier(&self, tier: Tier) -> Result<Vec<Record>>;

    /// A random-access handle for analyze and query.
    fn probe_init(&self) -> Box<dyn Probe>;
}

/// Random-access reads against the durable store. Misses (an unsolved
/// tier, a position outside its file) read as the (Undecided, 0) sentinel.
pub trait Probe: Send {
    fn record(&mut self, tier_position: TierPosition) -> Result<Record>;

    fn value(&mut self, tier_position: TierPosition) -> Result<Value> {
        Ok(self.record(tier_position)?.value())
    }

    fn remoteness(&mut self, tier_position: TierPosition) -> Result<Remoteness> {
        Ok(self.record(tier_position)?.remoteness())
    }
}

/// Tier files under `<data_path>/<game>/<variant>/`, written with the
/// block codec in `compression`.
#[derive(Debug)]
pub struct BlockDb {
    dir: PathBuf,
    tier_names: FxHashMap<Tier, String>,
    solving: Option<SolvingTier>,
}

impl BlockDb {
    pub fn new(data_path: &Path, game: &str, variant: &str) -> Result<Self> {
        let dir = data_path.join(game).join(variant);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            tier_names: FxHashMap::default(),
            solving: None,
        })
    }

    fn tier_file(&self, tier: Tier) -> PathBuf {
        match self.tier_names.get(&tier) {
            Some(name) => self.dir.join(name),
            None => self.dir.join(tier.to_string()),
        }
    }
}

impl Database for BlockDb {
    fn register_tier_name(&mut self, tier: Tier, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > MAX_TIER_FILE_NAME_LEN {
            return Err(Error::InvalidArgument(format!(
                "tier file name \"{name}\" must have between 1 and \
                 {MAX_TIER_FILE_NAME_LEN} characters"
            )));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::InvalidArgument(format!(
                "tier file name \"{name}\" is not a plain file name"
            )));
        }
        self.tier_names.insert(tier, name.to_string());
        Ok(())
    }

    fn create_solving_tier(&mut self, tier: Tier, size: i64) -> Result<()> {
        debug_assert!(self.solving.is_none(), "previous solving tier not freed");
        self.solving = Some(SolvingTier::new(tier, size)?);
        Ok(())
    }

    fn solving_tier(&self) -> Result<&SolvingTier> {
        self.solving.as_ref().ok_or(Error::UseBeforeInitialization)
    }

    fn flush_solving_tier(&mut self) -> Result<()> {
        let solving = self.solving.as_ref().ok_or(Error::UseBeforeInitialization)?;
        let records = solving.records();
        let path = self.tier_file(solving.tier());
        // written to the side, renamed once complete; a crash mid-flush
        // must not leave a file that later reads as solved
        let tmp = path.with_extension("tmp");
        let mut encoder = EncoderDecoder::new(File::create(&tmp)?);
        encoder.compress(solving.tier(), &records)?;
        fs::rename(&tmp, &path)?;
        debug!(
            "flushed tier {} ({} positions) to {}",
            solving.tier(),
            records.len(),
            path.display()
        );
        Ok(())
    }

    fn free_solving_tier(&mut self) {
        self.solving = None;
    }

    fn is_tier_solved(&self, tier: Tier) -> bool {
        self.tier_file(tier).is_file()
    }

    fn load_tier(&self, tier: Tier) -> Result<Vec<Record>> {
        let raf = RandomAccessFile::open(self.tier_file(tier))?;
        Ok(EncoderDecoder::new(raf).decompress_file(tier)?)
    }

    fn probe_init(&self) -> Box<dyn Probe> {
        Box::new(BlockProbe {
            dir: self.dir.clone(),
            tier_names: self.tier_names.clone(),
            cached: None,
        })
    }
}

struct CachedBlock {
    tier: Tier,
    file: RandomAccessFile,
    block: DecodedBlock,
}

/// Probe handle over the tier files. Caches the open file and decoded
/// block of the last tier touched.
pub struct BlockProbe {
    dir: PathBuf,
    tier_names: FxHashMap<Tier, String>,
    cached: Option<CachedBlock>,
}

impl BlockProbe {
    fn tier_file(&self, tier: Tier) -> PathBuf {
        match self.tier_names.get(&tier) {
            Some(name) => self.dir.join(name),
            None => self.dir.join(tier.to_string()),
        }
    }
}

impl Probe for BlockProbe {
    fn record(&mut self, tier_position: TierPosition) -> Result<Record> {
        if tier_position.position < 0 {
            return Err(Error::InvalidArgument(format!(
                "negative position {}",
                tier_position.position
            )));
        }
        let index = tier_position.position as u64;

        if let Some(cached) = &self.cached {
            if cached.tier == tier_position.tier && cached.block.contains(index) {
                return Ok(cached.block.record(index));
            }
        }

        let file = match self.cached.take() {
            Some(cached) if cached.tier == tier_position.tier => cached.file,
            _ => match RandomAccessFile::open(self.tier_file(tier_position.tier)) {
                Ok(file) => file,
                // unsolved tier reads as the sentinel
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Ok(Record::default());
                }
                Err(err) => return Err(err.into()),
            },
        };
        let decoder = EncoderDecoder::new(file);
        let block = match decoder.decode_block_containing(tier_position.tier, index) {
            Ok(block) => block,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Record::default());
            }
            Err(err) => return Err(err.into()),
        };
        let record = block.record(index);
        self.cached = Some(CachedBlock {
            tier: tier_position.tier,
            file: decoder.into_inner(),
            block,
        });
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("gamesman-db-tests")
            .join(format!("{test}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_solving_tier_zero_initialized() {
        let tier = SolvingTier::new(0, 10).unwrap();
        for position in 0..10 {
            assert_eq!(tier.value(position), Value::Undecided);
            assert_eq!(tier.remoteness(position), 0);
        }
    }

    #[test]
    fn test_claim_is_exclusive() {
        let tier = SolvingTier::new(0, 1).unwrap();
        assert!(tier.try_claim(0, Value::Win, 3));
        assert!(!tier.try_claim(0, Value::Lose, 4));
        assert_eq!(tier.value(0), Value::Win);
        assert_eq!(tier.remoteness(0), 3);
    }

    #[test]
    fn test_concurrent_claims_have_one_winner() {
        let tier = SolvingTier::new(0, 1000).unwrap();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let tier = &tier;
                scope.spawn(move || {
                    for position in 0..1000 {
                        let _ = tier.try_claim(position, Value::Win, 1);
                    }
                });
            }
        });
        for position in 0..1000 {
            assert_eq!(tier.value(position), Value::Win);
            assert_eq!(tier.remoteness(position), 1);
        }
    }

    #[test]
    fn test_counter_decrement() {
        let tier = SolvingTier::new(0, 1).unwrap();
        tier.init_counter(0, 3);
        assert_eq!(tier.decrement_counter(0), 2);
        assert_eq!(tier.decrement_counter(0), 1);
        assert_eq!(tier.decrement_counter(0), 0);
        assert_eq!(tier.value(0), Value::Undecided);
    }

    #[test]
    fn test_records_mask_leftover_counters() {
        let tier = SolvingTier::new(0, 2).unwrap();
        tier.init_counter(0, 7); // never decided: still (Undecided, 0)
        tier.set(1, Value::Tie, 4);
        let records = tier.records();
        assert_eq!(records[0], Record::default());
        assert_eq!(records[1], Record::new(Value::Tie, 4));
    }

    #[test]
    fn test_flush_load_round_trip() {
        let dir = scratch_dir("flush-load");
        let mut db = BlockDb::new(&dir, "game", "0").unwrap();
        db.create_solving_tier(5, 100).unwrap();
        {
            let tier = db.solving_tier().unwrap();
            tier.set(0, Value::Lose, 0);
            tier.set(99, Value::Win, 13);
        }
        assert!(!db.is_tier_solved(5));
        db.flush_solving_tier().unwrap();
        db.free_solving_tier();
        assert!(db.is_tier_solved(5));

        let records = db.load_tier(5).unwrap();
        assert_eq!(records.len(), 100);
        assert_eq!(records[0], Record::new(Value::Lose, 0));
        assert_eq!(records[99], Record::new(Value::Win, 13));
        assert_eq!(records[50], Record::default());
    }

    #[test]
    fn test_probe_hits_and_misses() {
        let dir = scratch_dir("probe");
        let mut db = BlockDb::new(&dir, "game", "0").unwrap();
        db.create_solving_tier(2, 10).unwrap();
        db.solving_tier().unwrap().set(3, Value::Win, 7);
        db.flush_solving_tier().unwrap();
        db.free_solving_tier();

        let mut probe = db.probe_init();
        assert_eq!(
            probe.record(TierPosition::new(2, 3)).unwrap(),
            Record::new(Value::Win, 7)
        );
        // repeated query serviced from the cached block
        assert_eq!(probe.value(TierPosition::new(2, 3)).unwrap(), Value::Win);
        assert_eq!(probe.remoteness(TierPosition::new(2, 3)).unwrap(), 7);
        // unsolved tier reads as the sentinel
        assert_eq!(probe.value(TierPosition::new(9, 0)).unwrap(), Value::Undecided);
    }

    #[test]
    fn test_register_tier_name() {
        let dir = scratch_dir("names");
        let mut db = BlockDb::new(&dir, "game", "0").unwrap();
        db.register_tier_name(0, "opening").unwrap();
        assert!(db.register_tier_name(1, "").is_err());
        assert!(db
            .register_tier_name(1, "a-name-well-over-the-thirty-one-limit")
            .is_err());
        assert!(db.register_tier_name(1, "../escape").is_err());

        db.create_solving_tier(0, 4).unwrap();
        db.flush_solving_tier().unwrap();
        db.free_solving_tier();
        assert!(dir.join("game").join("0").join("opening").is_file());
        assert!(db.is_tier_solved(0));
    }
}
