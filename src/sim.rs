// Read simulator.
//
// Samples reads along random paths of a target subgraph and optionally
// perturbs them with substitution and indel errors, given either as
// fixed counts or as per-base rates. Each record carries its provenance:
// the origin sequence, the error counts, and how much variant (non
// reference) material the path crossed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::graph::manager::ContigResolver;
use crate::graph::{Graph, NodeId};
use crate::io::sam::{tags, Record};
use crate::utils::Base;

/// Attempts per requested read before giving up on the stratum.
const MAX_ATTEMPTS: usize = 1000;

/// One stratum of simulated reads.
#[derive(Clone, Debug, PartialEq)]
pub struct SimProfile {
    /// Read length.
    pub len: usize,
    /// Substitution errors: a count, or a per-base rate with `use_rate`.
    pub muterr: f32,
    /// Indel errors: a count, or a per-base rate with `use_rate`.
    pub indelerr: f32,
    /// Interpret `muterr` and `indelerr` as rates.
    pub use_rate: bool,
    /// Required variant nodes on the path, `-1` for any.
    pub var_nodes: i32,
    /// Required variant bases on the path, `-1` for any.
    pub var_bases: i32,
}

impl Default for SimProfile {
    fn default() -> SimProfile {
        SimProfile {
            len: 50,
            muterr: 0.0,
            indelerr: 0.0,
            use_rate: false,
            var_nodes: -1,
            var_bases: -1,
        }
    }
}

struct PathRead {
    seq: Vec<Base>,
    /// 1-based linear position of the last sampled base.
    end_pos: u32,
    var_nodes: u32,
    var_bases: u32,
    hap: Option<usize>,
}

/// Samples reads from one graph.
pub struct Sim<'a> {
    graph: &'a Graph,
    prof: SimProfile,
    rng: StdRng,
    serial: u64,
}

impl<'a> Sim<'a> {
    pub fn new(graph: &'a Graph, prof: SimProfile) -> Sim<'a> {
        Sim {
            graph,
            prof,
            rng: StdRng::from_entropy(),
            serial: 0,
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(graph: &'a Graph, prof: SimProfile, seed: u64) -> Sim<'a> {
        Sim {
            graph,
            prof,
            rng: StdRng::seed_from_u64(seed),
            serial: 0,
        }
    }

    /// Generate up to `n` reads; fewer when the stratum cannot be
    /// satisfied on this graph.
    pub fn get_batch(&mut self, n: usize, resolver: &ContigResolver) -> Vec<Record> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.generate() {
                Some(rec) => out.push(self.finish_record(rec, resolver)),
                None => {
                    log::warn!(
                        "could not satisfy simulation stratum (len {}, vnodes {}, vbases {})",
                        self.prof.len,
                        self.prof.var_nodes,
                        self.prof.var_bases
                    );
                    break;
                }
            }
        }
        out
    }

    fn generate(&mut self) -> Option<PathRead> {
        for _ in 0..MAX_ATTEMPTS {
            if let Some(read) = self.try_path() {
                let n_count = read.seq.iter().filter(|&&b| b == Base::N).count();
                if n_count > self.prof.len / 2 {
                    continue;
                }
                if self.prof.var_nodes >= 0 && read.var_nodes != self.prof.var_nodes as u32 {
                    continue;
                }
                if self.prof.var_bases >= 0 && read.var_bases != self.prof.var_bases as u32 {
                    continue;
                }
                return Some(read);
            }
        }
        None
    }

    /// Walk a random path, collecting `len` bases.
    fn try_path(&mut self) -> Option<PathRead> {
        let order = self.graph.order();
        if order.is_empty() {
            return None;
        }
        let hap = if self.graph.pop_size() > 0 {
            Some(self.rng.gen_range(0..self.graph.pop_size()))
        } else {
            None
        };
        let mut node_id = order[self.rng.gen_range(0..order.len())];
        let mut node = self.graph.node(node_id);
        let mut offset = if node.seq().is_empty() {
            0
        } else {
            self.rng.gen_range(0..node.seq().len())
        };

        let mut seq = Vec::with_capacity(self.prof.len);
        let mut end_pos = 0u32;
        let mut var_nodes = 0u32;
        let mut var_bases = 0u32;
        let mut seen_first_var = false;

        while seq.len() < self.prof.len {
            if offset < node.seq().len() {
                seq.push(node.seq()[offset]);
                end_pos = node.begin_pos() + offset as u32 + 1;
                if !node.is_ref() {
                    var_bases += 1;
                    if !seen_first_var {
                        var_nodes += 1;
                        seen_first_var = true;
                    }
                }
                offset += 1;
                continue;
            }
            // Advance to a successor compatible with the chosen haplotype.
            let succ = self.graph.outgoing(node_id);
            if succ.is_empty() {
                return None;
            }
            node_id = self.pick_successor(succ, hap)?;
            node = self.graph.node(node_id);
            offset = 0;
            seen_first_var = false;
        }
        Some(PathRead {
            seq,
            end_pos,
            var_nodes,
            var_bases,
            hap,
        })
    }

    fn pick_successor(&mut self, succ: &[NodeId], hap: Option<usize>) -> Option<NodeId> {
        if let Some(h) = hap {
            let carriers: Vec<NodeId> = succ
                .iter()
                .copied()
                .filter(|&id| {
                    let pop = self.graph.node(id).population();
                    h < pop.len() && pop.get(h)
                })
                .collect();
            if !carriers.is_empty() {
                return Some(carriers[self.rng.gen_range(0..carriers.len())]);
            }
        }
        Some(succ[self.rng.gen_range(0..succ.len())])
    }

    fn finish_record(&mut self, read: PathRead, resolver: &ContigResolver) -> Record {
        const ALPHABET: [Base; 4] = [Base::A, Base::C, Base::G, Base::T];
        let origin: String = read.seq.iter().map(|b| b.to_char()).collect();
        let mut seq = read.seq;

        // Substitution errors.
        let mut sub_err = 0u32;
        if self.prof.use_rate {
            for base in seq.iter_mut() {
                if self.rng.gen_bool(self.prof.muterr.clamp(0.0, 1.0) as f64) {
                    *base = self.mutate(*base, &ALPHABET);
                    sub_err += 1;
                }
            }
        } else {
            for _ in 0..self.prof.muterr.round() as usize {
                let i = self.rng.gen_range(0..seq.len());
                seq[i] = self.mutate(seq[i], &ALPHABET);
                sub_err += 1;
            }
        }

        // Indel errors.
        let mut indel_err = 0u32;
        let indels = if self.prof.use_rate {
            let mut n = 0;
            for _ in 0..seq.len() {
                if self.rng.gen_bool(self.prof.indelerr.clamp(0.0, 1.0) as f64) {
                    n += 1;
                }
            }
            n
        } else {
            self.prof.indelerr.round() as usize
        };
        for _ in 0..indels {
            if seq.len() <= 1 {
                break;
            }
            let i = self.rng.gen_range(0..seq.len());
            if self.rng.gen_bool(0.5) {
                seq.remove(i);
            } else {
                seq.insert(i, ALPHABET[self.rng.gen_range(0..4)]);
            }
            indel_err += 1;
        }

        let begin = read.end_pos + 1 - origin.len() as u32;
        let (contig, pos) = resolver.resolve(begin);

        self.serial += 1;
        let mut rec = Record {
            qname: format!("sim{}", self.serial),
            rname: contig,
            pos,
            seq: seq.iter().map(|b| b.to_char()).collect(),
            ..Record::default()
        };
        rec.aux.set_str(tags::ORIGIN, &origin);
        rec.aux.set_int(tags::SUB_ERRORS, sub_err as i64);
        rec.aux.set_int(tags::INDEL_ERRORS, indel_err as i64);
        rec.aux.set_int(tags::VAR_NODES, read.var_nodes as i64);
        rec.aux.set_int(tags::VAR_BASES, read.var_bases as i64);
        if let Some(h) = read.hap {
            rec.aux.set_int(tags::SAMPLE_INDEX, h as i64);
        }
        rec
    }

    fn mutate(&mut self, base: Base, alphabet: &[Base; 4]) -> Base {
        loop {
            let cand = alphabet[self.rng.gen_range(0..4)];
            if cand != base {
                return cand;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use crate::graph::manager::GraphMan;

    const REF: &str = "CAAATAAGGCTTGGAAATTTTCTGGAGTTCTATTATATTCCAACTCTCTG";

    fn linear_graph() -> Graph {
        let node = Node::with_seq(REF, REF.len() as u32 - 1);
        Graph::assemble(vec![node], &[])
    }

    fn resolver() -> ContigResolver {
        let gdef = format!(
            "@vgraph\n\n@contigs\n0\tx\n\n@graphs\nbase\t0\t\n\n@nodes\n0\t{}\t1\t1\t{}\n{}\n",
            REF.len() - 1,
            REF.len(),
            REF
        );
        let mut gm = GraphMan::new();
        gm.open_from(gdef.as_bytes()).unwrap();
        gm.resolver()
    }

    #[test]
    fn error_free_reads_match_reference() {
        let g = linear_graph();
        let prof = SimProfile {
            len: 12,
            ..SimProfile::default()
        };
        let mut sim = Sim::with_seed(&g, prof, 7);
        let reads = sim.get_batch(20, &resolver());
        assert_eq!(reads.len(), 20);
        for rec in &reads {
            assert_eq!(rec.rname, "x");
            assert_eq!(rec.seq.len(), 12);
            let start = rec.pos as usize - 1;
            assert_eq!(&REF[start..start + 12], rec.seq);
            assert_eq!(rec.aux.get(tags::ORIGIN), Some(rec.seq.as_str()));
            assert_eq!(rec.aux.get_int(tags::SUB_ERRORS), Some(0));
            assert_eq!(rec.aux.get_int(tags::INDEL_ERRORS), Some(0));
            assert_eq!(rec.aux.get_int(tags::VAR_NODES), Some(0));
        }
    }

    #[test]
    fn substitution_counts_reported() {
        let g = linear_graph();
        let prof = SimProfile {
            len: 20,
            muterr: 2.0,
            ..SimProfile::default()
        };
        let mut sim = Sim::with_seed(&g, prof, 11);
        let reads = sim.get_batch(10, &resolver());
        for rec in &reads {
            assert_eq!(rec.aux.get_int(tags::SUB_ERRORS), Some(2));
            let origin = rec.aux.get(tags::ORIGIN).unwrap();
            let diff = origin
                .bytes()
                .zip(rec.seq.bytes())
                .filter(|(a, b)| a != b)
                .count();
            assert!(diff <= 2);
        }
    }

    #[test]
    fn variant_strata_filter() {
        // Bubble: reads requiring one variant node must cross the alt.
        let mut n0 = Node::with_seq("AAAA", 3);
        n0.pinch();
        let mut n1 = Node::with_seq("C", 4);
        n1.set_af(0.5);
        let mut n2 = Node::with_seq("G", 4);
        n2.set_not_ref();
        n2.set_af(0.5);
        let n3 = Node::with_seq("TTTT", 8);
        let g = Graph::assemble(vec![n0, n1, n2, n3], &[(0, 1), (0, 2), (1, 3), (2, 3)]);

        let prof = SimProfile {
            len: 6,
            var_nodes: 1,
            ..SimProfile::default()
        };
        let mut sim = Sim::with_seed(&g, prof, 3);
        let reads = sim.get_batch(5, &resolver());
        for rec in &reads {
            assert_eq!(rec.aux.get_int(tags::VAR_NODES), Some(1));
            assert_eq!(rec.aux.get_int(tags::VAR_BASES), Some(1));
            assert!(rec.seq.contains('G'));
        }
    }
}
