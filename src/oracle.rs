//! Boundary to the world-generation library.
//!
//! The core only ever asks three questions: is there a structure in this
//! region, is its position viable, and what pieces make it up. Every answer
//! may be "nothing here", which is the overwhelmingly common case and must be
//! cheap. An `Err` means the generator itself is unusable and ends the scan.

use std::collections::{HashMap, HashSet};

use crate::error::OracleError;
use crate::model::{BlockPos, RegionCoord, Seed};

/// Upper bound on pieces requested per structure. Longer lists are truncated.
pub const MAX_PIECES: usize = 1000;

/// Grid constants that belong to the generator version, not to the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OracleParams {
    /// Spacing between connected crossings (`U`).
    pub alignment_unit: i32,
    /// Edge length of one region in blocks.
    pub region_blocks: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PieceKind {
    Crossing,
    Corridor,
    Room,
    Other(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Piece {
    pub kind: PieceKind,
    pub pos: BlockPos,
}

impl Piece {
    pub fn new(kind: PieceKind, pos: BlockPos) -> Self {
        Self { kind, pos }
    }
}

/// Result of a successful placement query. Not persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StructureHandle {
    pub region: RegionCoord,
    pub pos: BlockPos,
}

/// A per-thread generator context.
///
/// Implementations are free to cache whatever they like; they are never
/// shared between threads.
pub trait Oracle {
    /// Rebind the generator context to `seed`.
    fn set_seed(&mut self, seed: Seed) -> Result<(), OracleError>;

    fn structure_position(
        &mut self,
        seed: Seed,
        region: RegionCoord,
    ) -> Result<Option<StructureHandle>, OracleError>;

    fn is_viable(&mut self, handle: &StructureHandle) -> Result<bool, OracleError>;

    /// Append the structure's pieces to `out`, which the caller has cleared.
    fn pieces(
        &mut self,
        seed: Seed,
        handle: &StructureHandle,
        out: &mut Vec<Piece>,
    ) -> Result<(), OracleError>;
}

/// Builds one [`Oracle`] per worker thread.
pub trait OracleFactory: Send + Sync {
    type Oracle: Oracle;

    fn params(&self) -> OracleParams;

    fn create(&self) -> Result<Self::Oracle, OracleError>;
}

#[derive(Clone, Debug)]
struct TableEntry {
    pos: BlockPos,
    viable: bool,
    pieces: Vec<Piece>,
}

/// Oracle that answers from a recorded table of structures.
///
/// Anything not in the table is absent. Useful to replay layouts captured
/// from a real generator.
#[derive(Clone, Debug)]
pub struct TableOracleFactory {
    params: OracleParams,
    entries: HashMap<(Seed, RegionCoord), TableEntry>,
    faults: HashSet<(Seed, RegionCoord)>,
}

impl TableOracleFactory {
    pub fn new(params: OracleParams) -> Self {
        Self {
            params,
            entries: HashMap::new(),
            faults: HashSet::new(),
        }
    }

    /// Make placement queries for `region` fail as if the generator broke.
    pub fn insert_fault(&mut self, seed: Seed, region: RegionCoord) {
        self.faults.insert((seed, region));
    }

    /// Record a viable structure at `pos` in `region`.
    pub fn insert(&mut self, seed: Seed, region: RegionCoord, pos: BlockPos, pieces: Vec<Piece>) {
        self.entries.insert(
            (seed, region),
            TableEntry {
                pos,
                viable: true,
                pieces,
            },
        );
    }

    /// Record a structure that fails the viability check.
    pub fn insert_unviable(&mut self, seed: Seed, region: RegionCoord, pos: BlockPos) {
        self.entries.insert(
            (seed, region),
            TableEntry {
                pos,
                viable: false,
                pieces: Vec::new(),
            },
        );
    }
}

impl OracleFactory for TableOracleFactory {
    type Oracle = TableOracle;

    fn params(&self) -> OracleParams {
        self.params
    }

    fn create(&self) -> Result<TableOracle, OracleError> {
        Ok(TableOracle {
            seed: 0,
            entries: self.entries.clone(),
            faults: self.faults.clone(),
        })
    }
}

pub struct TableOracle {
    seed: Seed,
    entries: HashMap<(Seed, RegionCoord), TableEntry>,
    faults: HashSet<(Seed, RegionCoord)>,
}

impl Oracle for TableOracle {
    fn set_seed(&mut self, seed: Seed) -> Result<(), OracleError> {
        self.seed = seed;
        Ok(())
    }

    fn structure_position(
        &mut self,
        seed: Seed,
        region: RegionCoord,
    ) -> Result<Option<StructureHandle>, OracleError> {
        if self.faults.contains(&(seed, region)) {
            return Err(OracleError::Internal(format!(
                "recorded fault at seed {seed} region ({}, {})",
                region.rx, region.rz
            )));
        }
        Ok(self
            .entries
            .get(&(seed, region))
            .map(|e| StructureHandle { region, pos: e.pos }))
    }

    fn is_viable(&mut self, handle: &StructureHandle) -> Result<bool, OracleError> {
        // Viability is answered for the seed the context is bound to.
        Ok(self
            .entries
            .get(&(self.seed, handle.region))
            .is_some_and(|e| e.pos == handle.pos && e.viable))
    }

    fn pieces(
        &mut self,
        seed: Seed,
        handle: &StructureHandle,
        out: &mut Vec<Piece>,
    ) -> Result<(), OracleError> {
        if let Some(e) = self.entries.get(&(seed, handle.region)) {
            out.extend_from_slice(&e.pieces);
        }
        Ok(())
    }
}
