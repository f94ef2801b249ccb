use crate::model::Crossing;
use crate::oracle::{Piece, PieceKind};

/// Most crossings considered for one structure; the rest are dropped.
pub const MAX_CROSSINGS: usize = 128;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extraction {
    pub kept: usize,
    pub dropped: usize,
}

/// Collect the anchors of every crossing piece into `out`.
///
/// `out` is cleared first. Crossings past [`MAX_CROSSINGS`] are counted in
/// [`Extraction::dropped`] and otherwise ignored.
pub fn extract_crossings(pieces: &[Piece], out: &mut Vec<Crossing>) -> Extraction {
    out.clear();
    let mut dropped = 0;
    for piece in pieces.iter().filter(|p| p.kind == PieceKind::Crossing) {
        if out.len() < MAX_CROSSINGS {
            out.push(piece.pos);
        } else {
            dropped += 1;
        }
    }
    Extraction {
        kept: out.len(),
        dropped,
    }
}
