//! Alignment engines and their mode dispatch.
//!
//! Four compile-time dimensions vary: cell width (8- or 16-bit lanes),
//! end-to-end vs. local, max-score-only, and max-without-sub. `Aligner`
//! is a tagged variant over the monomorphized engine instances so the
//! inner loops stay inlined, exposed behind one narrow capability:
//! align a batch into a result buffer.

pub mod engine;

pub use engine::Engine;

use crate::error::Result;
use crate::graph::Graph;
use crate::scoring::{Results, ScoreProfile};
use crate::simd_abstraction::{Int16Fast, Int8Fast, SimdVec};
use crate::utils::Base;

pub type ByteAligner = Engine<Int8Fast, false, false, false>;
pub type WordAligner = Engine<Int16Fast, false, false, false>;
pub type ByteAlignerEte = Engine<Int8Fast, true, false, false>;
pub type WordAlignerEte = Engine<Int16Fast, true, false, false>;

pub type MsByteAligner = Engine<Int8Fast, false, true, false>;
pub type MsWordAligner = Engine<Int16Fast, false, true, false>;
pub type MsByteAlignerEte = Engine<Int8Fast, true, true, false>;
pub type MsWordAlignerEte = Engine<Int16Fast, true, true, false>;

pub type MaxByteAligner = Engine<Int8Fast, false, false, true>;
pub type MaxWordAligner = Engine<Int16Fast, false, false, true>;
pub type MaxByteAlignerEte = Engine<Int8Fast, true, false, true>;
pub type MaxWordAlignerEte = Engine<Int16Fast, true, false, true>;

/// Safety margin under the signed 8-bit ceiling when choosing cell width.
const WIDE_MARGIN: i32 = 32;

/// True when a read batch needs 16-bit lanes: the perfect score comes too
/// close to the signed 8-bit maximum to leave headroom.
pub fn needs_wide_cells(read_len: usize, match_score: u8) -> bool {
    read_len as i32 * match_score as i32 >= i8::MAX as i32 - WIDE_MARGIN
}

/// One alignment engine, tagged by its mode combination.
pub enum Aligner {
    Byte(ByteAligner),
    Word(WordAligner),
    ByteEte(ByteAlignerEte),
    WordEte(WordAlignerEte),
    MsByte(MsByteAligner),
    MsWord(MsWordAligner),
    MsByteEte(MsByteAlignerEte),
    MsWordEte(MsWordAlignerEte),
    MaxByte(MaxByteAligner),
    MaxWord(MaxWordAligner),
    MaxByteEte(MaxByteAlignerEte),
    MaxWordEte(MaxWordAlignerEte),
}

macro_rules! dispatch {
    ($self:expr, $engine:ident => $body:expr) => {
        match $self {
            Aligner::Byte($engine) => $body,
            Aligner::Word($engine) => $body,
            Aligner::ByteEte($engine) => $body,
            Aligner::WordEte($engine) => $body,
            Aligner::MsByte($engine) => $body,
            Aligner::MsWord($engine) => $body,
            Aligner::MsByteEte($engine) => $body,
            Aligner::MsWordEte($engine) => $body,
            Aligner::MaxByte($engine) => $body,
            Aligner::MaxWord($engine) => $body,
            Aligner::MaxByteEte($engine) => $body,
            Aligner::MaxWordEte($engine) => $body,
        }
    };
}

impl Aligner {
    /// Construct the engine for a mode combination. `msonly` wins over
    /// `maxonly` when both are requested; end-to-end comes from the
    /// profile.
    pub fn new(
        read_len: usize,
        prof: &ScoreProfile,
        wide: bool,
        msonly: bool,
        maxonly: bool,
    ) -> Result<Aligner> {
        let prof = prof.clone();
        let ete = prof.end_to_end;
        Ok(match (wide, ete, msonly, maxonly) {
            (false, false, true, _) => Aligner::MsByte(Engine::new(read_len, prof)?),
            (false, true, true, _) => Aligner::MsByteEte(Engine::new(read_len, prof)?),
            (true, false, true, _) => Aligner::MsWord(Engine::new(read_len, prof)?),
            (true, true, true, _) => Aligner::MsWordEte(Engine::new(read_len, prof)?),
            (false, false, false, true) => Aligner::MaxByte(Engine::new(read_len, prof)?),
            (false, true, false, true) => Aligner::MaxByteEte(Engine::new(read_len, prof)?),
            (true, false, false, true) => Aligner::MaxWord(Engine::new(read_len, prof)?),
            (true, true, false, true) => Aligner::MaxWordEte(Engine::new(read_len, prof)?),
            (false, false, false, false) => Aligner::Byte(Engine::new(read_len, prof)?),
            (false, true, false, false) => Aligner::ByteEte(Engine::new(read_len, prof)?),
            (true, false, false, false) => Aligner::Word(Engine::new(read_len, prof)?),
            (true, true, false, false) => Aligner::WordEte(Engine::new(read_len, prof)?),
        })
    }

    /// Reads aligned per batch at this cell width.
    pub fn read_capacity(&self) -> usize {
        match self {
            Aligner::Byte(_)
            | Aligner::ByteEte(_)
            | Aligner::MsByte(_)
            | Aligner::MsByteEte(_)
            | Aligner::MaxByte(_)
            | Aligner::MaxByteEte(_) => Int8Fast::LANES,
            _ => Int16Fast::LANES,
        }
    }

    pub fn read_len(&self) -> usize {
        dispatch!(self, e => e.read_len())
    }

    /// Align a batch into `res`. See [`Engine::align_into`].
    pub fn align_into(
        &mut self,
        reads: &[Vec<Base>],
        quals: &[Vec<u8>],
        graph: &Graph,
        res: &mut Results,
        fwdonly: bool,
    ) -> Result<()> {
        dispatch!(self, e => e.align_into(reads, quals, graph, res, fwdonly))
    }
}

/// Cell width in bits for an `Aligner` choice, for logs.
pub fn cell_bits(wide: bool) -> u32 {
    if wide {
        16
    } else {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::utils::seq_to_num;

    #[test]
    fn width_heuristic() {
        assert!(!needs_wide_cells(22, 2));
        assert!(needs_wide_cells(50, 2));
        assert!(needs_wide_cells(100, 1));
        assert!(!needs_wide_cells(90, 1));
    }

    #[test]
    fn dispatch_matches_modes() {
        let prof = ScoreProfile::default();
        let a = Aligner::new(10, &prof, false, false, false).unwrap();
        assert_eq!(a.read_capacity(), Int8Fast::LANES);
        assert_eq!(a.read_len(), 10);

        let a = Aligner::new(10, &prof, true, false, false).unwrap();
        assert_eq!(a.read_capacity(), Int16Fast::LANES);

        let mut ete = prof.clone();
        ete.end_to_end = true;
        let mut a = Aligner::new(4, &ete, false, false, false).unwrap();
        assert!(matches!(a, Aligner::ByteEte(_)));

        let node = Node::with_seq("ACGTACGT", 7);
        let g = Graph::assemble(vec![node], &[]);
        let mut res = Results::default();
        a.align_into(&[seq_to_num("ACGT")], &[], &g, &mut res, true)
            .unwrap();
        assert_eq!(res.max_score[0], 8);
    }

    #[test]
    fn msonly_wins_over_maxonly() {
        let prof = ScoreProfile::default();
        let a = Aligner::new(10, &prof, false, true, true).unwrap();
        assert!(matches!(a, Aligner::MsByte(_)));
    }
}
