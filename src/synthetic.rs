//! Deterministic stand-in for the real structure generator.
//!
//! Placement follows the shape of the nether-complex grid (27-chunk regions,
//! 4-chunk separation, fortress on 2 of 5 rolls) and the bridge layouts are
//! random walks on the crossing lattice. Nothing here reproduces real terrain;
//! it exists so the scanner can be run and benchmarked end to end without
//! linking a generation library.

use std::collections::HashSet;

use crate::error::OracleError;
use crate::model::{BlockPos, RegionCoord, Seed};
use crate::oracle::{
    Oracle, OracleFactory, OracleParams, Piece, PieceKind, StructureHandle,
};

pub const SUPPORTED_VERSIONS: [&str; 6] = ["1.16", "1.17", "1.18", "1.19", "1.20", "1.21"];

const REGION_CHUNKS: i32 = 27;
const SEPARATION_CHUNKS: i32 = 4;
const BLOCKS_PER_CHUNK: i32 = 16;
const NETHER_SALT: i64 = 30_084_232;
const CROSSING_UNIT: i32 = 19;
const DECK_Y: i32 = 64;
const MAX_WALK: i32 = 9;

#[derive(Clone, Debug)]
pub struct SyntheticOracleFactory {
    version: String,
}

impl SyntheticOracleFactory {
    pub fn for_version(version: &str) -> Result<Self, OracleError> {
        let version = version.trim();
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(OracleError::UnsupportedVersion(version.to_string()));
        }
        Ok(Self {
            version: version.to_string(),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl OracleFactory for SyntheticOracleFactory {
    type Oracle = SyntheticOracle;

    fn params(&self) -> OracleParams {
        OracleParams {
            alignment_unit: CROSSING_UNIT,
            region_blocks: REGION_CHUNKS * BLOCKS_PER_CHUNK,
        }
    }

    fn create(&self) -> Result<SyntheticOracle, OracleError> {
        Ok(SyntheticOracle {
            seed: 0,
            visited: HashSet::with_capacity(MAX_WALK as usize),
        })
    }
}

pub struct SyntheticOracle {
    seed: Seed,
    visited: HashSet<(i32, i32)>,
}

impl Oracle for SyntheticOracle {
    fn set_seed(&mut self, seed: Seed) -> Result<(), OracleError> {
        self.seed = seed;
        Ok(())
    }

    fn structure_position(
        &mut self,
        seed: Seed,
        region: RegionCoord,
    ) -> Result<Option<StructureHandle>, OracleError> {
        let region_seed = i64::from(region.rx)
            .wrapping_mul(341_873_128_712)
            .wrapping_add(i64::from(region.rz).wrapping_mul(132_897_987_541))
            .wrapping_add(seed)
            .wrapping_add(NETHER_SALT);
        let mut rng = JavaRandom::new(region_seed);
        let span = REGION_CHUNKS - SEPARATION_CHUNKS;
        let chunk_x = region.rx.wrapping_mul(REGION_CHUNKS).wrapping_add(rng.next_int(span));
        let chunk_z = region.rz.wrapping_mul(REGION_CHUNKS).wrapping_add(rng.next_int(span));
        // Bastions take the other three rolls.
        if rng.next_int(5) >= 2 {
            return Ok(None);
        }
        Ok(Some(StructureHandle {
            region,
            pos: BlockPos::new(
                chunk_x.wrapping_mul(BLOCKS_PER_CHUNK),
                DECK_Y,
                chunk_z.wrapping_mul(BLOCKS_PER_CHUNK),
            ),
        }))
    }

    fn is_viable(&mut self, handle: &StructureHandle) -> Result<bool, OracleError> {
        let mut rng = JavaRandom::new(chunk_mix(self.seed, handle.pos) ^ 0x5f3759df);
        Ok(rng.next_int(5) != 0)
    }

    fn pieces(
        &mut self,
        seed: Seed,
        handle: &StructureHandle,
        out: &mut Vec<Piece>,
    ) -> Result<(), OracleError> {
        let mut rng = JavaRandom::new(chunk_mix(seed, handle.pos));
        let base = handle.pos;
        out.push(Piece::new(PieceKind::Room, base));

        self.visited.clear();
        let steps = 1 + rng.next_int(MAX_WALK);
        let (mut gx, mut gz) = (0i32, 0i32);
        self.visited.insert((gx, gz));
        out.push(crossing_at(base, gx, gz));
        for _ in 0..steps {
            let (dx, dz) = match rng.next_int(4) {
                0 => (1, 0),
                1 => (-1, 0),
                2 => (0, 1),
                _ => (0, -1),
            };
            let from = lattice_pos(base, gx, gz);
            gx += dx;
            gz += dz;
            let to = lattice_pos(base, gx, gz);
            out.push(Piece::new(
                PieceKind::Corridor,
                BlockPos::new((from.x + to.x) / 2, base.y, (from.z + to.z) / 2),
            ));
            if self.visited.insert((gx, gz)) {
                out.push(crossing_at(base, gx, gz));
            }
        }
        Ok(())
    }
}

fn lattice_pos(base: BlockPos, gx: i32, gz: i32) -> BlockPos {
    BlockPos::new(
        base.x.wrapping_add(gx * CROSSING_UNIT),
        base.y,
        base.z.wrapping_add(gz * CROSSING_UNIT),
    )
}

fn crossing_at(base: BlockPos, gx: i32, gz: i32) -> Piece {
    Piece::new(PieceKind::Crossing, lattice_pos(base, gx, gz))
}

fn chunk_mix(seed: Seed, pos: BlockPos) -> i64 {
    let cx = i64::from(pos.x >> 4);
    let cz = i64::from(pos.z >> 4);
    seed.wrapping_add(cx.wrapping_mul(4_987_142))
        .wrapping_add(cz.wrapping_mul(5_947_611))
        ^ 987_234_911
}

/// `java.util.Random` LCG, the generator the placement rolls are defined by.
pub(crate) struct JavaRandom {
    seed: i64,
}

impl JavaRandom {
    const MULTIPLIER: i64 = 0x5DEECE66D;
    const ADDEND: i64 = 0xB;
    const MASK: i64 = (1_i64 << 48) - 1;

    pub(crate) fn new(seed: i64) -> Self {
        let initial = (seed ^ Self::MULTIPLIER) & Self::MASK;
        Self { seed: initial }
    }

    fn next(&mut self, bits: u32) -> i32 {
        self.seed = (self
            .seed
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::ADDEND))
            & Self::MASK;
        (self.seed >> (48 - bits)) as i32
    }

    /// Uniform in `[0, bound)`. `bound` must be positive.
    pub(crate) fn next_int(&mut self, bound: i32) -> i32 {
        debug_assert!(bound > 0, "bound must be positive");
        if bound & (bound - 1) == 0 {
            return ((bound as i64 * self.next(31) as i64) >> 31) as i32;
        }
        loop {
            let bits = self.next(31);
            let value = bits % bound;
            if bits.wrapping_sub(value).wrapping_add(bound - 1) >= 0 {
                return value;
            }
        }
    }
}
