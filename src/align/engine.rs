// Inter-sequence vectorized Smith-Waterman over a variation graph.
//
// One SIMD lane carries one read; a batch of up to `V::LANES` reads is
// packed into a query profile and driven across the graph in insertion
// order. Each node consumes the element-wise maximum of its predecessors'
// ending columns (the seed), fills its own score columns, and publishes
// its ending columns for the successors. At each pinch point the seed
// table drops every fully consumed seed, so peak memory follows bubble
// width rather than graph size.
//
// All arithmetic is signed saturating. A bias keeps intermediate values
// representable: local alignments grow from the lane minimum, end-to-end
// alignments decay from `max - read_len * match`.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::graph::{Graph, Node, NodeId};
use crate::scoring::{Results, ScoreProfile};
use crate::simd_abstraction::{LaneScalar, SimdVec};
use crate::utils::Base;

/// Ending columns of one node's score matrix, consumed by its successors.
#[derive(Clone)]
struct Seed<V: SimdVec> {
    s_col: Vec<V>,
    i_col: Vec<V>,
}

impl<V: SimdVec> Seed<V> {
    fn new(read_len: usize, fill: V) -> Seed<V> {
        Seed {
            s_col: vec![fill; read_len + 1],
            i_col: vec![fill; read_len + 1],
        }
    }
}

/// Vectorized alignment engine.
///
/// `ETE` selects end-to-end scoring, `MSONLY` collects the max score with
/// no positions, and `MAXONLY` collects max score and positions but no
/// sub-optimal score. The remaining mode tracks the best strictly
/// sub-optimal score as well, with a "waiting" candidate that is only
/// committed once it is clear of the primary maximum by the de-duplication
/// radius of `2 * read_len` (a heuristic window, not a proved property).
pub struct Engine<V: SimdVec, const ETE: bool, const MSONLY: bool, const MAXONLY: bool> {
    prof: ScoreProfile,
    read_len: usize,
    bias: i32,

    // Query profile: per read position, per reference base, one lane
    // vector of substitution scores.
    qp: Vec<[V; 5]>,
    qp_scratch: Vec<V::Lane>,

    // DP columns, reused across nodes.
    s: Vec<V>,
    dc: Vec<V>,
    ic: Vec<V>,

    gext_rd: V,
    goe_rd: V,
    gext_ref: V,
    goe_ref: V,

    // Score registers with per-lane scalar mirrors. The registers serve
    // the vector compares; the mirrors take the rare per-lane updates and
    // are reloaded into the registers afterwards.
    max_score_v: V,
    sub_score_v: V,
    waiting_score_v: V,
    max_score: Vec<i32>,
    sub_score: Vec<i32>,
    waiting_score: Vec<i32>,

    max_last_pos: Vec<u32>,
    sub_last_pos: Vec<u32>,
    waiting_pos: Vec<u32>,
    waiting_last_pos: Vec<u32>,
    max_pos_list: Vec<Vec<u32>>,
    sub_pos_list: Vec<Vec<u32>>,

    lane_mask: Vec<V::Lane>,
    lane_s: Vec<V::Lane>,
    lane_tmp: Vec<V::Lane>,
}

/// Load per-lane scalar scores back into a register.
fn load_scores<V: SimdVec>(src: &[i32], scratch: &mut [V::Lane]) -> V {
    for (d, &v) in scratch.iter_mut().zip(src) {
        *d = V::Lane::from_i32_sat(v);
    }
    V::load(scratch)
}

impl<V: SimdVec, const ETE: bool, const MSONLY: bool, const MAXONLY: bool>
    Engine<V, ETE, MSONLY, MAXONLY>
{
    /// Reads aligned per batch.
    pub const fn read_capacity() -> usize {
        V::LANES
    }

    pub fn read_len(&self) -> usize {
        self.read_len
    }

    pub fn profile(&self) -> &ScoreProfile {
        &self.prof
    }

    /// Build an engine for reads of at most `read_len` bases.
    ///
    /// Fails with `SaturationRisk` when a perfect-score read cannot be
    /// represented at this cell width. In end-to-end mode a soft warning
    /// is logged when the gap or mismatch budget could still saturate.
    pub fn new(read_len: usize, mut prof: ScoreProfile) -> Result<Self> {
        if read_len == 0 {
            return Err(Error::InvalidInput("read length must be positive".to_string()));
        }
        prof.end_to_end = ETE;
        let range = V::Lane::MAX_VALUE - V::Lane::MIN_VALUE;
        let perfect = read_len as i32 * prof.match_score as i32;
        if perfect > range {
            return Err(Error::SaturationRisk(format!(
                "read length {} with match bonus {} exceeds the {}-bit cell range",
                read_len,
                prof.match_score,
                if range > 255 { 16 } else { 8 }
            )));
        }
        let bias = if ETE {
            let bias = V::Lane::MAX_VALUE - perfect;
            let gap_budget =
                prof.read_gopen as i32 + prof.read_gext as i32 * (read_len as i32 - 1);
            let mismatch_budget = read_len as i32 * prof.mismatch_max as i32;
            if gap_budget > bias || mismatch_budget > bias {
                log::warn!(
                    "possible score saturation in end-to-end mode: bias {}, \
                     gap budget {}, mismatch budget {}",
                    bias,
                    gap_budget,
                    mismatch_budget
                );
            }
            bias
        } else {
            V::Lane::MIN_VALUE
        };

        let lanes = V::LANES;
        let splat_i32 = |v: i32| V::splat(V::Lane::from_i32_sat(v));
        let min_v = V::splat(V::Lane::from_i32_sat(V::Lane::MIN_VALUE));
        let mut engine = Engine {
            gext_rd: splat_i32(prof.read_gext as i32),
            goe_rd: splat_i32(prof.read_gopen as i32 + prof.read_gext as i32),
            gext_ref: splat_i32(prof.ref_gext as i32),
            goe_ref: splat_i32(prof.ref_gopen as i32 + prof.ref_gext as i32),
            prof,
            read_len,
            bias,
            qp: vec![[min_v; 5]; read_len],
            qp_scratch: vec![V::Lane::ZERO; read_len * 5 * lanes],
            s: vec![min_v; read_len + 1],
            dc: vec![min_v; read_len + 1],
            ic: vec![min_v; read_len + 1],
            max_score_v: min_v,
            sub_score_v: min_v,
            waiting_score_v: min_v,
            max_score: vec![V::Lane::MIN_VALUE; lanes],
            sub_score: vec![V::Lane::MIN_VALUE; lanes],
            waiting_score: vec![V::Lane::MIN_VALUE; lanes],
            max_last_pos: vec![0; lanes],
            sub_last_pos: vec![0; lanes],
            waiting_pos: vec![0; lanes],
            waiting_last_pos: vec![0; lanes],
            max_pos_list: vec![Vec::new(); lanes],
            sub_pos_list: vec![Vec::new(); lanes],
            lane_mask: vec![V::Lane::ZERO; lanes],
            lane_s: vec![V::Lane::ZERO; lanes],
            lane_tmp: vec![V::Lane::ZERO; lanes],
        };
        // Row 0 of the deletion column never participates.
        engine.dc[0] = min_v;
        Ok(engine)
    }

    // ------------------------------------------------------------------
    // Batch entry point
    // ------------------------------------------------------------------

    /// Align `reads` (with optional per-read qualities) against `graph`,
    /// filling `res`. Reads beyond the lane count are processed in
    /// further passes over the graph. With `fwdonly` false the traversal
    /// is repeated on the reverse-complemented reads and the strand
    /// results are merged: a strictly better reverse score drops the
    /// forward positions, ties keep both.
    pub fn align_into(
        &mut self,
        reads: &[Vec<Base>],
        quals: &[Vec<u8>],
        graph: &Graph,
        res: &mut Results,
        fwdonly: bool,
    ) -> Result<()> {
        if reads.is_empty() {
            res.resize(0);
            return Ok(());
        }
        if !quals.is_empty() && quals.len() != reads.len() {
            return Err(Error::InvalidInput(
                "quality rows do not match read count".to_string(),
            ));
        }
        for read in reads {
            if read.len() > self.read_len {
                return Err(Error::InvalidInput(format!(
                    "read of length {} exceeds engine read length {}",
                    read.len(),
                    self.read_len
                )));
            }
        }

        let lanes = V::LANES;
        let num_groups = reads.len().div_ceil(lanes);
        res.resize(num_groups * lanes);

        let mut seed_map: HashMap<NodeId, Seed<V>> = HashMap::new();

        for group in 0..num_groups {
            let beg = group * lanes;
            let end = ((group + 1) * lanes).min(reads.len());
            let n_in_group = end - beg;
            let group_quals = if quals.is_empty() { &[] } else { &quals[beg..end] };

            self.reset_group();

            // Forward strand.
            self.load_reads(&reads[beg..end], group_quals, false);
            seed_map.clear();
            self.traverse(graph, &mut seed_map)?;
            self.commit_trailing_waiting();
            if !MSONLY {
                for lane in 0..n_in_group {
                    res.max_pos_fwd[beg + lane] = self.max_pos_list[lane].clone();
                    res.max_pos_rev[beg + lane].clear();
                    res.sub_pos_rev[beg + lane].clear();
                    if !MAXONLY {
                        res.sub_pos_fwd[beg + lane] = self.sub_pos_list[lane].clone();
                    }
                }
            }

            // Reverse strand: scores persist so only improvements count.
            if !fwdonly {
                self.load_reads(&reads[beg..end], group_quals, true);
                seed_map.clear();
                let fwd_max = self.max_score.clone();
                let fwd_sub = self.sub_score.clone();
                for lane in 0..lanes {
                    self.max_last_pos[lane] = 0;
                    self.sub_last_pos[lane] = 0;
                    self.waiting_pos[lane] = 0;
                    self.waiting_score[lane] = self.sub_score[lane];
                    self.max_pos_list[lane].clear();
                    self.sub_pos_list[lane].clear();
                }
                self.waiting_score_v = load_scores::<V>(&self.waiting_score, &mut self.lane_tmp);

                self.traverse(graph, &mut seed_map)?;
                self.commit_trailing_waiting();
                if !MSONLY {
                    for lane in 0..n_in_group {
                        res.max_pos_rev[beg + lane] = self.max_pos_list[lane].clone();
                        if !MAXONLY {
                            res.sub_pos_rev[beg + lane] = self.sub_pos_list[lane].clone();
                        }
                        if self.max_score[lane] > fwd_max[lane] {
                            res.max_pos_fwd[beg + lane].clear();
                        }
                        if self.sub_score[lane] > fwd_sub[lane] {
                            res.sub_pos_fwd[beg + lane].clear();
                        }
                    }
                }
            }

            if MSONLY {
                self.max_score_v.store(&mut self.lane_s);
                for lane in 0..lanes {
                    self.max_score[lane] = self.lane_s[lane].to_i32();
                }
            }
            for lane in 0..n_in_group {
                res.max_score[beg + lane] = self.max_score[lane] - self.bias;
                if !MSONLY && !MAXONLY {
                    res.sub_score[beg + lane] = self.sub_score[lane] - self.bias;
                }
            }
        }

        res.resize(reads.len());
        res.profile = Some(self.prof.clone());
        Ok(())
    }

    /// Forward-only convenience wrapper without qualities.
    pub fn align(&mut self, reads: &[Vec<Base>], graph: &Graph) -> Result<Results> {
        let mut res = Results::default();
        self.align_into(reads, &[], graph, &mut res, true)?;
        Ok(res)
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    fn traverse(&mut self, graph: &Graph, seed_map: &mut HashMap<NodeId, Seed<V>>) -> Result<()> {
        let bias_v = V::splat(V::Lane::from_i32_sat(self.bias));
        let read_len = self.read_len;
        let mut seed = Seed::new(read_len, bias_v);
        // Successor reads still outstanding per published seed.
        let mut uses: HashMap<NodeId, usize> = HashMap::new();
        for node in graph.iter() {
            let incoming = graph.incoming(node.id());
            self.gather_seed(incoming, seed_map, &mut seed)?;
            for p in incoming {
                if let Some(n) = uses.get_mut(p) {
                    *n = n.saturating_sub(1);
                }
            }
            if node.is_pinched() {
                // Retire every seed with no readers left. A pinch on the
                // last allele of an adjacent-site run keeps its sibling
                // seeds alive until the next site has consumed them.
                seed_map.retain(|id, _| uses.get(id).copied().unwrap_or(0) > 0);
            }
            uses.insert(node.id(), graph.outgoing(node.id()).len());
            let out = seed_map
                .entry(node.id())
                .or_insert_with(|| Seed::new(read_len, bias_v));
            Self::fill_node_inner(
                node,
                &seed,
                out,
                &self.qp,
                &mut self.s,
                &mut self.dc,
                &mut self.ic,
                self.gext_rd,
                self.goe_rd,
                self.gext_ref,
                self.goe_ref,
                self.bias,
                self.read_len,
                &mut ObserveState {
                    max_score_v: &mut self.max_score_v,
                    sub_score_v: &mut self.sub_score_v,
                    waiting_score_v: &mut self.waiting_score_v,
                    max_score: &mut self.max_score,
                    sub_score: &mut self.sub_score,
                    waiting_score: &mut self.waiting_score,
                    max_last_pos: &mut self.max_last_pos,
                    sub_last_pos: &mut self.sub_last_pos,
                    waiting_pos: &mut self.waiting_pos,
                    waiting_last_pos: &mut self.waiting_last_pos,
                    max_pos_list: &mut self.max_pos_list,
                    sub_pos_list: &mut self.sub_pos_list,
                    lane_mask: &mut self.lane_mask,
                    lane_s: &mut self.lane_s,
                    lane_tmp: &mut self.lane_tmp,
                },
            );
        }
        Ok(())
    }

    /// Element-wise max over the predecessors' seeds, or a synthesized
    /// initial column when the node has none.
    fn gather_seed(
        &self,
        prev: &[NodeId],
        seed_map: &HashMap<NodeId, Seed<V>>,
        seed: &mut Seed<V>,
    ) -> Result<()> {
        let bias_v = V::splat(V::Lane::from_i32_sat(self.bias));
        if prev.is_empty() {
            self.seed_initial(seed);
            return Ok(());
        }
        let missing = |id: NodeId| {
            Error::MalformedGraph(format!(
                "predecessor {} has no seed; the traversal order is not topological",
                id
            ))
        };
        let first = seed_map.get(&prev[0]).ok_or_else(|| missing(prev[0]))?;
        seed.s_col[1..].copy_from_slice(&first.s_col[1..]);
        seed.i_col[1..].copy_from_slice(&first.i_col[1..]);
        seed.s_col[0] = bias_v;
        seed.i_col[0] = bias_v;
        for &p in &prev[1..] {
            let other = seed_map.get(&p).ok_or_else(|| missing(p))?;
            for row in 1..=self.read_len {
                seed.s_col[row] = seed.s_col[row].max(other.s_col[row]);
                seed.i_col[row] = seed.i_col[row].max(other.i_col[row]);
            }
        }
        Ok(())
    }

    /// Initial column for a node with no predecessors. End-to-end decays
    /// with reference-gap penalties; local starts flat at the bias.
    fn seed_initial(&self, seed: &mut Seed<V>) {
        let bias_v = V::splat(V::Lane::from_i32_sat(self.bias));
        if ETE {
            seed.s_col[0] = bias_v;
            for row in 1..=self.read_len {
                let v = self.bias
                    - self.prof.ref_gopen as i32
                    - row as i32 * self.prof.ref_gext as i32;
                seed.s_col[row] = V::splat(V::Lane::from_i32_sat(v));
            }
        } else {
            for row in 0..=self.read_len {
                seed.s_col[row] = bias_v;
            }
        }
        seed.i_col.copy_from_slice(&seed.s_col);
    }

    /// Fill one node's columns from `seed`, observing cell scores, and
    /// leave the ending columns in `out`. Free function over split
    /// borrows so the seed map entry can be filled in place.
    #[allow(clippy::too_many_arguments)]
    fn fill_node_inner(
        node: &Node,
        seed: &Seed<V>,
        out: &mut Seed<V>,
        qp: &[[V; 5]],
        s: &mut [V],
        dc: &mut [V],
        ic: &mut [V],
        gext_rd: V,
        goe_rd: V,
        gext_ref: V,
        goe_ref: V,
        bias: i32,
        read_len: usize,
        state: &mut ObserveState<'_, V>,
    ) {
        // Empty nodes are pure deletion edges: the seed passes through.
        if node.seq().is_empty() {
            out.s_col.copy_from_slice(&seed.s_col);
            out.i_col.copy_from_slice(&seed.i_col);
            return;
        }

        let mut curr_pos = node.end_pos() + 2 - node.seq().len() as u32;
        let bias_v = V::splat(V::Lane::from_i32_sat(bias));

        s.copy_from_slice(&seed.s_col);
        ic.copy_from_slice(&seed.i_col);
        for &ref_base in node.seq() {
            let mut sd = bias_v;
            for row in 1..=read_len {
                let d = dc[row - 1].subs(gext_ref).max(s[row - 1].subs(goe_ref));
                dc[row] = d;
                let i = ic[row].subs(gext_rd).max(s[row].subs(goe_rd));
                ic[row] = i;
                let diag = sd.adds(qp[row - 1][ref_base as usize]);
                sd = s[row];
                let cell = d.max(i).max(diag);
                s[row] = cell;
                if !ETE {
                    state.observe::<MSONLY, MAXONLY>(cell, curr_pos, read_len);
                }
            }
            if ETE {
                let cell = s[read_len];
                state.observe::<MSONLY, MAXONLY>(cell, curr_pos, read_len);
            }
            curr_pos += 1;
        }
        out.s_col.copy_from_slice(s);
        out.i_col.copy_from_slice(ic);
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    fn reset_group(&mut self) {
        let min_v = V::splat(V::Lane::from_i32_sat(V::Lane::MIN_VALUE));
        self.max_score_v = min_v;
        self.sub_score_v = min_v;
        self.waiting_score_v = min_v;
        for lane in 0..V::LANES {
            self.max_score[lane] = V::Lane::MIN_VALUE;
            self.sub_score[lane] = V::Lane::MIN_VALUE;
            self.waiting_score[lane] = V::Lane::MIN_VALUE;
            self.max_last_pos[lane] = 0;
            self.sub_last_pos[lane] = 0;
            self.waiting_pos[lane] = 0;
            self.waiting_last_pos[lane] = 0;
            self.max_pos_list[lane].clear();
            self.sub_pos_list[lane].clear();
        }
    }

    /// After the traversal, commit a still-waiting sub-max whose position
    /// was never overtaken by a new primary occurrence.
    fn commit_trailing_waiting(&mut self) {
        if MSONLY || MAXONLY {
            return;
        }
        let pending = self.waiting_score_v.gt_mask(self.sub_score_v);
        if !pending.any() {
            return;
        }
        pending.store(&mut self.lane_mask);
        for lane in 0..V::LANES {
            if self.lane_mask[lane].to_i32() != 0 && self.max_last_pos[lane] < self.waiting_pos[lane]
            {
                self.sub_score[lane] = self.waiting_score[lane];
                self.sub_last_pos[lane] = self.waiting_last_pos[lane];
                self.sub_pos_list[lane].clear();
                self.sub_pos_list[lane].push(self.waiting_pos[lane]);
            }
        }
        self.sub_score_v = load_scores::<V>(&self.sub_score, &mut self.lane_tmp);
    }

    // ------------------------------------------------------------------
    // Query profile packing
    // ------------------------------------------------------------------

    /// Interleave the batch into the query profile: lane `r` of entry
    /// `(i, b)` scores read `r`'s base `i` against reference base `b`.
    /// Short reads are left-padded with zero-contribution columns; the
    /// reverse strand packs the reverse complement.
    fn load_reads(&mut self, reads: &[Vec<Base>], quals: &[Vec<u8>], revcomp: bool) {
        let lanes = V::LANES;
        debug_assert!(reads.len() <= lanes);
        for v in self.qp_scratch.iter_mut() {
            *v = V::Lane::ZERO;
        }

        const REAL_BASES: [Base; 4] = [Base::A, Base::C, Base::G, Base::T];
        for (lane, read) in reads.iter().enumerate() {
            let pad = self.read_len - read.len();
            for p in 0..read.len() {
                let src = if revcomp { read.len() - 1 - p } else { p };
                let rdb = if revcomp {
                    read[src].complement()
                } else {
                    read[src]
                };
                let qual = quals.get(lane).and_then(|q| q.get(src)).copied();
                let row = pad + p;
                let idx = |b: usize| (row * 5 + b) * lanes + lane;

                self.qp_scratch[idx(Base::N as usize)] =
                    V::Lane::from_i32_sat(-(self.prof.ambig as i32));
                for b in REAL_BASES {
                    let score = if rdb == Base::N {
                        -(self.prof.ambig as i32)
                    } else if rdb == b {
                        self.prof.match_score as i32
                    } else if let Some(q) = qual {
                        -(self.prof.penalty(q) as i32)
                    } else {
                        -(self.prof.mismatch_max as i32)
                    };
                    self.qp_scratch[idx(b as usize)] = V::Lane::from_i32_sat(score);
                }
            }
        }

        for row in 0..self.read_len {
            for b in 0..5 {
                let start = (row * 5 + b) * lanes;
                self.qp[row][b] = V::load(&self.qp_scratch[start..start + lanes]);
            }
        }
    }
}

// ============================================================================
// Per-cell observation
// ============================================================================

/// Mutable bookkeeping registers, split out of the engine so the DP loop
/// can borrow the query profile and the score columns at the same time.
struct ObserveState<'a, V: SimdVec> {
    max_score_v: &'a mut V,
    sub_score_v: &'a mut V,
    waiting_score_v: &'a mut V,
    max_score: &'a mut Vec<i32>,
    sub_score: &'a mut Vec<i32>,
    waiting_score: &'a mut Vec<i32>,
    max_last_pos: &'a mut Vec<u32>,
    sub_last_pos: &'a mut Vec<u32>,
    waiting_pos: &'a mut Vec<u32>,
    waiting_last_pos: &'a mut Vec<u32>,
    max_pos_list: &'a mut Vec<Vec<u32>>,
    sub_pos_list: &'a mut Vec<Vec<u32>>,
    lane_mask: &'a mut Vec<V::Lane>,
    lane_s: &'a mut Vec<V::Lane>,
    lane_tmp: &'a mut Vec<V::Lane>,
}

impl<'a, V: SimdVec> ObserveState<'a, V> {
    /// Fold one cell vector into the score/position bookkeeping.
    ///
    /// Position lists are de-duplicated with a `2 * read_len` radius:
    /// two reported positions at the same score level are always more
    /// than that far apart, and a sub-optimal position is only committed
    /// once it is clear of every primary occurrence by the same radius.
    #[inline(always)]
    fn observe<const MSONLY: bool, const MAXONLY: bool>(&mut self, s: V, pos: u32, read_len: usize) {
        if MSONLY {
            *self.max_score_v = s.max(*self.max_score_v);
            return;
        }
        let lanes = V::LANES;
        let radius = 2 * read_len as u32;

        // Repeated primary score.
        let m = s.eq_mask(*self.max_score_v);
        if m.any() {
            m.store(self.lane_mask);
            for lane in 0..lanes {
                if self.lane_mask[lane].to_i32() == 0 {
                    continue;
                }
                if pos > self.max_last_pos[lane] + radius {
                    self.max_pos_list[lane].push(pos);
                }
                self.max_last_pos[lane] = pos;
                if !MAXONLY {
                    // Any waiting candidate is now within the radius.
                    self.waiting_pos[lane] = 0;
                    self.waiting_score[lane] = self.sub_score[lane];
                    if let Some(&last) = self.sub_pos_list[lane].last() {
                        if last + radius > pos {
                            self.sub_pos_list[lane].pop();
                        }
                    }
                }
            }
            if !MAXONLY {
                *self.waiting_score_v = load_scores::<V>(self.waiting_score, self.lane_tmp);
            }
        }

        // New primary score.
        let m = s.gt_mask(*self.max_score_v);
        if m.any() {
            m.store(self.lane_mask);
            s.store(self.lane_s);
            for lane in 0..lanes {
                if self.lane_mask[lane].to_i32() == 0 {
                    continue;
                }
                if !MAXONLY {
                    if let Some(&last) = self.max_pos_list[lane].last() {
                        if last + radius > pos {
                            self.max_pos_list[lane].pop();
                        }
                    }
                    if !self.max_pos_list[lane].is_empty() {
                        // The dethroned maximum still has occurrences far
                        // enough back: demote it to the sub-optimal slot.
                        self.sub_score[lane] = self.max_score[lane];
                        self.sub_last_pos[lane] = self.max_last_pos[lane];
                        self.sub_pos_list[lane] = self.max_pos_list[lane].clone();
                    } else if let Some(&last) = self.sub_pos_list[lane].last() {
                        if last + radius > pos {
                            self.sub_pos_list[lane].pop();
                        }
                    }
                    self.waiting_pos[lane] = 0;
                    self.waiting_score[lane] = self.sub_score[lane];
                }
                self.max_score[lane] = self.lane_s[lane].to_i32();
                self.max_last_pos[lane] = pos;
                self.max_pos_list[lane].clear();
                self.max_pos_list[lane].push(pos);
            }
            *self.max_score_v = load_scores::<V>(self.max_score, self.lane_tmp);
            if !MAXONLY {
                *self.sub_score_v = load_scores::<V>(self.sub_score, self.lane_tmp);
                *self.waiting_score_v = load_scores::<V>(self.waiting_score, self.lane_tmp);
            }
        }

        if MAXONLY {
            return;
        }

        // Repeated waiting sub-max score.
        let m = s.eq_mask(*self.waiting_score_v);
        if m.any() {
            m.store(self.lane_mask);
            for lane in 0..lanes {
                if self.lane_mask[lane].to_i32() != 0 && self.waiting_pos[lane] > 0 {
                    self.waiting_last_pos[lane] = pos;
                }
            }
        }

        // Repeated committed sub-max score.
        let m = s.eq_mask(*self.sub_score_v);
        if m.any() {
            m.store(self.lane_mask);
            for lane in 0..lanes {
                if self.lane_mask[lane].to_i32() == 0 {
                    continue;
                }
                let clear_of_max = self.max_pos_list[lane]
                    .last()
                    .is_some_and(|&last| pos > last + radius);
                let clear_of_sub = self.sub_pos_list[lane]
                    .last()
                    .is_some_and(|&last| pos > last + radius);
                if clear_of_max && clear_of_sub {
                    self.sub_pos_list[lane].push(pos);
                }
                self.sub_last_pos[lane] = pos;
            }
        }

        // New waiting candidate: strictly between sub and max, and clear
        // of the last primary occurrence.
        let m = s.gt_mask(*self.sub_score_v).and(self.max_score_v.gt_mask(s));
        if m.any() {
            m.store(self.lane_mask);
            s.store(self.lane_s);
            let mut changed = false;
            for lane in 0..lanes {
                if self.lane_mask[lane].to_i32() == 0 {
                    continue;
                }
                let val = self.lane_s[lane].to_i32();
                if pos > self.max_last_pos[lane] + radius
                    && (self.waiting_pos[lane] == 0 || val > self.waiting_score[lane])
                {
                    self.waiting_score[lane] = val;
                    self.waiting_pos[lane] = pos;
                    self.waiting_last_pos[lane] = pos;
                    changed = true;
                }
            }
            if changed {
                *self.waiting_score_v = load_scores::<V>(self.waiting_score, self.lane_tmp);
            }
        }

        // Commit a waiting candidate once it is clear of its own last
        // occurrence by the radius.
        let m = self.waiting_score_v.gt_mask(*self.sub_score_v);
        if m.any() {
            m.store(self.lane_mask);
            let mut changed = false;
            for lane in 0..lanes {
                if self.lane_mask[lane].to_i32() == 0 {
                    continue;
                }
                if self.waiting_pos[lane] > 0 && pos > self.waiting_last_pos[lane] + radius {
                    self.sub_score[lane] = self.waiting_score[lane];
                    self.sub_last_pos[lane] = self.waiting_last_pos[lane];
                    self.sub_pos_list[lane].clear();
                    self.sub_pos_list[lane].push(self.waiting_pos[lane]);
                    self.waiting_pos[lane] = 0;
                    changed = true;
                }
            }
            if changed {
                *self.sub_score_v = load_scores::<V>(self.sub_score, self.lane_tmp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simd_abstraction::{I16x8, I8x16};
    use crate::utils::seq_to_num;

    type ByteLocal = Engine<I8x16, false, false, false>;
    type ByteEte = Engine<I8x16, true, false, false>;
    type WordEte = Engine<I16x8, true, false, false>;

    fn linear_graph(seq: &str) -> Graph {
        let node = Node::with_seq(seq, seq.len() as u32 - 1);
        Graph::assemble(vec![node], &[])
    }

    #[test]
    fn bias_bound_check() {
        // 100 * 3 exceeds the 8-bit range but fits 16 bits.
        assert!(ByteEte::new(100, ScoreProfile::new(3, 2, 2, 2)).is_err());
        assert!(WordEte::new(100, ScoreProfile::new(3, 2, 2, 2)).is_ok());
        assert!(ByteLocal::new(100, ScoreProfile::new(2, 2, 3, 1)).is_ok());
    }

    #[test]
    fn perfect_match_score_and_position() {
        let g = linear_graph("ACGCGATCGACGATCGAACGATCGATGCCAGTGC");
        let mut a = ByteLocal::new(8, ScoreProfile::default()).unwrap();
        let res = a
            .align(&[seq_to_num("GCCAGTGC")], &g)
            .unwrap();
        assert_eq!(res.max_score[0], 16);
        assert_eq!(res.max_pos_fwd[0], vec![34]);
    }

    #[test]
    fn reverse_strand_merge() {
        let g = linear_graph("ACGCGATCGACGATCGAACGATCGATGCCAGTGC");
        let mut a = ByteEte::new(8, ScoreProfile::new(2, 6, 5, 3)).unwrap();
        let reads = vec![seq_to_num("GCCAGTGC"), seq_to_num("GCACTGGC")];
        let mut res = Results::default();
        a.align_into(&reads, &[], &g, &mut res, false).unwrap();
        assert_eq!(res.max_pos_fwd[0], vec![34]);
        assert!(res.max_pos_rev[0].is_empty());
        assert_eq!(res.max_pos_rev[1], vec![34]);
        assert!(res.max_pos_fwd[1].is_empty());
        assert_eq!(res.max_strand(0), crate::scoring::Strand::Fwd);
        assert_eq!(res.max_strand(1), crate::scoring::Strand::Rev);
    }

    #[test]
    fn deletion_node_passes_seed_through() {
        // ACGT -> {"" (del), C} -> ACGT, read spans the deletion.
        let mut n0 = Node::with_seq("ACGT", 3);
        let mut n1 = Node::with_seq("", 3);
        n1.set_not_ref();
        n1.set_af(0.5);
        let mut n2 = Node::with_seq("C", 4);
        n2.set_af(0.5);
        let n3 = Node::with_seq("ACGT", 8);
        n0.pinch();
        let g = Graph::assemble(vec![n0, n1, n2, n3], &[(0, 1), (0, 2), (1, 3), (2, 3)]);

        let mut a = ByteLocal::new(8, ScoreProfile::default()).unwrap();
        let res = a.align(&[seq_to_num("ACGTACGT")], &g).unwrap();
        assert_eq!(res.max_score[0], 16);
        assert_eq!(res.max_pos_fwd[0], vec![9]);
    }

    #[test]
    fn msonly_and_maxonly_modes() {
        let g = linear_graph("AAAACCCCCCCCCCCCAAA");
        let reads = vec![seq_to_num("AAAA")];

        let mut ms = Engine::<I8x16, false, true, false>::new(4, ScoreProfile::default()).unwrap();
        let res = ms.align(&reads, &g).unwrap();
        assert_eq!(res.max_score[0], 8);
        assert!(res.max_pos_fwd[0].is_empty());

        let mut mx = Engine::<I8x16, false, false, true>::new(4, ScoreProfile::default()).unwrap();
        let res = mx.align(&reads, &g).unwrap();
        assert_eq!(res.max_score[0], 8);
        assert_eq!(res.max_pos_fwd[0], vec![4]);
        // Sub tracking is off in this mode.
        assert_eq!(res.sub_score[0], 0);
        assert!(res.sub_pos_fwd[0].is_empty());
    }

    #[test]
    fn malformed_order_detected() {
        // Edge points backwards in insertion order.
        let n0 = Node::with_seq("ACGT", 3);
        let n1 = Node::with_seq("ACGT", 7);
        let mut g = Graph::assemble(vec![n1, n0], &[(1, 0)]);
        // Rebuild with the same arena but an order that breaks topology.
        g = Graph::from_parts(
            g.arena().clone(),
            vec![0, 1],
            [(1u32, vec![0u32])].into_iter().collect(),
            0,
        );
        let mut a = ByteLocal::new(4, ScoreProfile::default()).unwrap();
        let err = a.align(&[seq_to_num("ACGT")], &g).unwrap_err();
        assert!(matches!(err, Error::MalformedGraph(_)));
    }
}
