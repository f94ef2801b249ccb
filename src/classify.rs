//! Lattice alignment detection over one region's crossings.

use log::debug;

use crate::error::OracleError;
use crate::features::extract_crossings;
use crate::model::{BlockPos, ClusterResult, Crossing, PatternType, RegionCoord, Seed};
use crate::oracle::{Oracle, Piece, MAX_PIECES};

/// No pattern can be formed from fewer crossings than this.
pub const MIN_CROSSINGS: usize = 3;

/// Which lattice neighbours an anchor has on its own level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Neighbours {
    pub right: bool,
    pub right2: bool,
    pub down: bool,
    pub down2: bool,
    pub diag: bool,
}

impl Neighbours {
    pub fn of(anchor: Crossing, crossings: &[Crossing], unit: i32) -> Self {
        let mut n = Neighbours::default();
        for other in crossings.iter().filter(|c| c.y == anchor.y) {
            let dx = i64::from(other.x) - i64::from(anchor.x);
            let dz = i64::from(other.z) - i64::from(anchor.z);
            let u = i64::from(unit);
            match (dx, dz) {
                (dx, 0) if dx == u => n.right = true,
                (dx, 0) if dx == 2 * u => n.right2 = true,
                (0, dz) if dz == u => n.down = true,
                (0, dz) if dz == 2 * u => n.down2 = true,
                (dx, dz) if dx == u && dz == u => n.diag = true,
                _ => {}
            }
        }
        n
    }

    /// Highest-precedence pattern these neighbours satisfy.
    pub fn pattern(self) -> Option<PatternType> {
        if self.right && self.down && self.diag {
            Some(PatternType::Quad)
        } else if self.right && self.right2 && self.down {
            Some(PatternType::TShape)
        } else if self.right && self.down {
            Some(PatternType::LShape)
        } else if (self.right && self.right2) || (self.down && self.down2) {
            Some(PatternType::Triple)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub center: BlockPos,
    pub pattern: PatternType,
}

/// Classify every anchor of one region, at most one candidate per anchor.
pub fn classify_region(crossings: &[Crossing], unit: i32) -> Vec<Candidate> {
    let mut found = Vec::new();
    classify_into(crossings, unit, &mut found);
    found
}

fn classify_into(crossings: &[Crossing], unit: i32, found: &mut Vec<Candidate>) {
    if crossings.len() < MIN_CROSSINGS {
        return;
    }
    let half = unit / 2;
    for &anchor in crossings {
        if let Some(pattern) = Neighbours::of(anchor, crossings, unit).pattern() {
            found.push(Candidate {
                center: BlockPos::new(
                    anchor.x.saturating_add(half),
                    anchor.y,
                    anchor.z.saturating_add(half),
                ),
                pattern,
            });
        }
    }
}

/// Reusable per-worker buffers for [`evaluate_region`].
#[derive(Debug, Default)]
pub struct Scratch {
    pieces: Vec<Piece>,
    crossings: Vec<Crossing>,
    candidates: Vec<Candidate>,
}

impl Scratch {
    pub fn new() -> Self {
        Self {
            pieces: Vec::with_capacity(MAX_PIECES),
            crossings: Vec::new(),
            candidates: Vec::new(),
        }
    }
}

/// Run one region through oracle, extractor and classifier.
///
/// Clusters are appended to `found`. Absent or unviable structures leave it
/// untouched; only a generator fault is an error.
pub fn evaluate_region<O: Oracle + ?Sized>(
    oracle: &mut O,
    seed: Seed,
    region: RegionCoord,
    unit: i32,
    permanent: bool,
    scratch: &mut Scratch,
    found: &mut Vec<ClusterResult>,
) -> Result<(), OracleError> {
    let Some(handle) = oracle.structure_position(seed, region)? else {
        return Ok(());
    };
    if !oracle.is_viable(&handle)? {
        return Ok(());
    }

    scratch.pieces.clear();
    oracle.pieces(seed, &handle, &mut scratch.pieces)?;
    if scratch.pieces.len() > MAX_PIECES {
        debug!(
            "seed {seed} region ({}, {}): {} pieces, truncated to {MAX_PIECES}",
            region.rx,
            region.rz,
            scratch.pieces.len()
        );
        scratch.pieces.truncate(MAX_PIECES);
    }
    if scratch.pieces.len() < MIN_CROSSINGS {
        return Ok(());
    }

    let extraction = extract_crossings(&scratch.pieces, &mut scratch.crossings);
    if extraction.dropped > 0 {
        debug!(
            "seed {seed} region ({}, {}): dropped {} crossings",
            region.rx, region.rz, extraction.dropped
        );
    }

    scratch.candidates.clear();
    classify_into(&scratch.crossings, unit, &mut scratch.candidates);
    found.extend(
        scratch
            .candidates
            .iter()
            .map(|c| ClusterResult::new(seed, c.center, c.pattern, permanent)),
    );
    Ok(())
}
