// Region-wise graph construction from a reference and a variant catalog.
//
// The builder walks one region left to right keeping a frontier of nodes
// at the right edge of the partial graph. Reference runs between variants
// become pinched backbone nodes (chunked to `max_node_len`); each variant
// site contributes one reference-allele node plus one node per
// materializable alternate, all fanning out from the frontier.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::graph::{NodeId, NodeMap, Node, Population};
use crate::io::fasta::FastaSource;
use crate::io::vcf::{VariantRecord, VariantSource};
use crate::utils::seq_to_num;

/// Half-open genomic region, 1-based inclusive bounds. `lo == 0` means the
/// contig start and `hi == 0` the contig end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub contig: String,
    pub lo: u64,
    pub hi: u64,
}

impl Region {
    pub fn whole(contig: &str) -> Region {
        Region {
            contig: contig.to_string(),
            lo: 0,
            hi: 0,
        }
    }
}

/// Parse `CHR` or `CHR:MIN-MAX`.
pub fn parse_region(s: &str) -> Result<Region> {
    let bad = || Error::InvalidInput(format!("bad region \"{}\" (expected CHR or CHR:MIN-MAX)", s));
    match s.split_once(':') {
        None => {
            if s.is_empty() {
                Err(bad())
            } else {
                Ok(Region::whole(s))
            }
        }
        Some((contig, range)) => {
            let (lo, hi) = range.split_once('-').ok_or_else(bad)?;
            Ok(Region {
                contig: contig.to_string(),
                lo: lo.parse().map_err(|_| bad())?,
                hi: hi.parse().map_err(|_| bad())?,
            })
        }
    }
}

/// Default cap on a single node's sequence length.
pub const DEFAULT_MAX_NODE_LEN: usize = 10_000_000;

/// One region's contribution to a base graph.
pub struct RegionPart {
    pub order: Vec<NodeId>,
    pub next: HashMap<NodeId, Vec<NodeId>>,
    /// Linear offset one past this region's last base.
    pub end_offset: u32,
}

/// Builds region graphs into a caller-owned arena.
pub struct GraphFactory {
    max_node_len: usize,
    record_limit: usize,
}

impl Default for GraphFactory {
    fn default() -> Self {
        GraphFactory {
            max_node_len: DEFAULT_MAX_NODE_LEN,
            record_limit: 0,
        }
    }
}

struct BuildState<'a> {
    arena: &'a mut NodeMap,
    next_id: &'a mut NodeId,
    order: Vec<NodeId>,
    next: HashMap<NodeId, Vec<NodeId>>,
    frontier: Vec<NodeId>,
    pop_size: usize,
    offset: u32,
}

impl<'a> BuildState<'a> {
    fn add_node(&mut self, node: Node) -> NodeId {
        let id = *self.next_id;
        *self.next_id += 1;
        let mut node = node;
        node.set_id(id);
        self.arena.insert(id, node);
        self.order.push(id);
        id
    }

    fn connect(&mut self, from: NodeId, to: NodeId) {
        self.next.entry(from).or_default().push(to);
    }

    /// 0-based linear coordinate of the base at 1-based contig position `g`.
    fn linear(&self, g: u64) -> u32 {
        self.offset + g as u32 - 1
    }

    /// Emit backbone nodes covering `[lo, hi]` (1-based, inclusive),
    /// chunked to `max_node_len`, and advance the frontier to the last one.
    fn emit_backbone(&mut self, seq: &[u8], lo: u64, hi: u64, max_node_len: usize) {
        let mut start = lo;
        while start <= hi {
            let end = (start + max_node_len as u64 - 1).min(hi);
            let chunk = &seq[(start - lo) as usize..=(end - lo) as usize];
            let mut node = Node::new(0);
            node.set_seq(seq_to_num(std::str::from_utf8(chunk).unwrap_or("")));
            node.set_end_pos(self.linear(end));
            node.set_as_ref();
            node.set_af(1.0);
            node.set_population(Population::new(self.pop_size, true));
            node.pinch();
            let id = self.add_node(node);
            for f in std::mem::take(&mut self.frontier) {
                self.connect(f, id);
            }
            self.frontier = vec![id];
            start = end + 1;
        }
    }
}

impl GraphFactory {
    pub fn new() -> GraphFactory {
        GraphFactory::default()
    }

    /// Cap node sequence length; longer reference runs are chunked.
    pub fn node_len(&mut self, len: usize) -> &mut GraphFactory {
        self.max_node_len = len.max(1);
        self
    }

    /// Stop after the first `n` variant records of each region.
    pub fn record_limit(&mut self, n: usize) -> &mut GraphFactory {
        self.record_limit = n;
        self
    }

    /// Build one region into `arena`, using `offset` as the region's
    /// linear coordinate base. Variants come from `vcf` when present.
    pub fn build_region(
        &self,
        fasta: &mut FastaSource,
        vcf: Option<&mut VariantSource>,
        region: &Region,
        offset: u32,
        arena: &mut NodeMap,
        next_id: &mut NodeId,
    ) -> Result<RegionPart> {
        let clen = fasta.contig_len(&region.contig).ok_or_else(|| {
            Error::InvalidInput(format!("contig \"{}\" not in reference", region.contig))
        })?;
        let lo = region.lo.max(1);
        let hi = if region.hi == 0 { clen } else { region.hi.min(clen) };
        if lo > hi {
            return Err(Error::InvalidInput(format!(
                "empty region {}:{}-{}",
                region.contig, region.lo, region.hi
            )));
        }

        let (variants, pop_size) = match vcf {
            Some(src) => {
                let recs = src.fetch(&region.contig, lo, hi, self.record_limit)?;
                (recs, src.num_haplotypes())
            }
            None => (Vec::new(), 0),
        };

        let seq = fasta.fetch(&region.contig, lo - 1, hi)?;
        let mut state = BuildState {
            arena,
            next_id,
            order: Vec::new(),
            next: HashMap::new(),
            frontier: Vec::new(),
            pop_size,
            offset,
        };

        let mut cursor = lo;
        for var in &variants {
            let ref_len = var.ref_allele.len() as u64;
            if var.pos < cursor {
                return Err(Error::Unsupported(format!(
                    "overlapping variant at {}:{} (previous record extends to {}); \
                     pre-merge overlapping records upstream",
                    region.contig,
                    var.pos,
                    cursor - 1
                )));
            }
            if var.pos + ref_len - 1 > hi {
                log::warn!(
                    "variant at {}:{} extends past the region end, skipping",
                    region.contig,
                    var.pos
                );
                continue;
            }
            if var.pos > cursor {
                let slice = &seq[(cursor - lo) as usize..(var.pos - lo) as usize];
                state.emit_backbone(slice, cursor, var.pos - 1, self.max_node_len);
            }
            self.emit_site(&mut state, var, &region.contig)?;
            cursor = var.pos + ref_len;
        }
        if cursor <= hi {
            let slice = &seq[(cursor - lo) as usize..];
            state.emit_backbone(slice, cursor, hi, self.max_node_len);
        }

        Ok(RegionPart {
            order: state.order,
            next: state.next,
            end_offset: offset + (hi - lo + 1) as u32,
        })
    }

    /// Emit the allele nodes of one variant site and advance the frontier.
    fn emit_site(&self, state: &mut BuildState, var: &VariantRecord, contig: &str) -> Result<()> {
        let ref_len = var.ref_allele.len() as u64;
        let site_end = state.linear(var.pos + ref_len - 1);

        let mut allele_nodes = Vec::new();

        // Reference allele: frequency is the alt-sum complement.
        let alt_sum: f32 = var.af.iter().sum();
        let mut node = Node::new(0);
        node.set_seq(seq_to_num(&var.ref_allele));
        node.set_end_pos(site_end);
        node.set_as_ref();
        node.set_af((1.0 - alt_sum).clamp(0.0, 1.0));
        node.set_population(population_of(var, 0, state.pop_size));
        allele_nodes.push(state.add_node(node));

        for (i, alt) in var.alts.iter().enumerate() {
            let seq = match materialize_alt(alt, &var.ref_allele) {
                Some(seq) => seq,
                None => {
                    log::warn!(
                        "skipping unsupported alt allele \"{}\" at {}:{}",
                        alt,
                        contig,
                        var.pos
                    );
                    continue;
                }
            };
            let mut node = Node::new(0);
            node.set_end_pos(if seq.is_empty() {
                // A pure deletion inherits the predecessor's end.
                state.linear(var.pos).saturating_sub(1)
            } else {
                site_end
            });
            node.set_seq(seq_to_num(&seq));
            node.set_not_ref();
            node.set_af(var.af.get(i).copied().unwrap_or(0.0));
            node.set_population(population_of(var, (i + 1) as u8, state.pop_size));
            allele_nodes.push(state.add_node(node));
        }

        // The outgoing frontier's last node becomes a pinch point; when
        // sites are adjacent this lands on the previous site's last
        // allele instead of a backbone chunk.
        if let Some(&last) = state.frontier.last() {
            if let Some(node) = state.arena.get_mut(&last) {
                node.pinch();
            }
        }
        for f in std::mem::take(&mut state.frontier) {
            for &a in &allele_nodes {
                state.connect(f, a);
            }
        }
        state.frontier = allele_nodes;
        Ok(())
    }
}

/// Haplotypes carrying allele `index` at this site.
fn population_of(var: &VariantRecord, index: u8, pop_size: usize) -> Population {
    if pop_size == 0 {
        return Population::default();
    }
    let mut pop = Population::new(pop_size, false);
    for (hap, &allele) in var.genotypes.iter().enumerate().take(pop_size) {
        if allele == index {
            pop.set(hap, true);
        }
    }
    pop
}

/// Expand an alternate allele token into explicit sequence. Copy-number
/// tokens `<CNk>` become the reference allele repeated `k` times; other
/// symbolic tokens cannot be materialized.
fn materialize_alt(alt: &str, ref_allele: &str) -> Option<String> {
    if !alt.starts_with('<') {
        return Some(alt.to_string());
    }
    let inner = alt.trim_start_matches('<').trim_end_matches('>');
    let copies: usize = inner.strip_prefix("CN")?.parse().ok()?;
    Some(ref_allele.repeat(copies))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parsing() {
        assert_eq!(parse_region("chr1").unwrap(), Region::whole("chr1"));
        assert_eq!(
            parse_region("x:5-100").unwrap(),
            Region {
                contig: "x".to_string(),
                lo: 5,
                hi: 100
            }
        );
        assert!(parse_region("").is_err());
        assert!(parse_region("x:5").is_err());
        assert!(parse_region("x:a-b").is_err());
    }

    #[test]
    fn alt_materialization() {
        assert_eq!(materialize_alt("ACG", "A"), Some("ACG".to_string()));
        assert_eq!(materialize_alt("<CN0>", "TA"), Some(String::new()));
        assert_eq!(materialize_alt("<CN3>", "C"), Some("CCC".to_string()));
        assert_eq!(materialize_alt("<DUP>", "C"), None);
        assert_eq!(materialize_alt("<CNV>", "C"), None);
    }
}
