// A collection of named graphs over one shared node arena.
//
// The manager owns the base graph built from (FASTA, VCF, regions), the
// subgraphs derived from it, and the linear-offset table that resolves a
// linear position back to (contig, position). It persists everything to a
// line-oriented text format and restores from it.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::graph::builder::{parse_region, GraphFactory, Region};
use crate::graph::{Graph, Node, NodeId, NodeMap, Population};
use crate::io::fasta::FastaSource;
use crate::io::vcf::VariantSource;
use crate::utils::realtime;

/// Label of the graph every definition ultimately derives from.
pub const BASE_LABEL: &str = "base";

/// How a subgraph was derived from its parent.
#[derive(Clone, Debug)]
pub enum DefKind {
    Base,
    Ref,
    MaxAf,
    Filter(Population),
}

#[derive(Clone, Debug)]
pub struct GraphDef {
    pub parent: String,
    pub kind: DefKind,
}

/// Maps a linear offset back to (contig, 1-based position).
#[derive(Clone, Debug, Default)]
pub struct ContigResolver {
    offsets: BTreeMap<u32, String>,
}

impl ContigResolver {
    /// Resolve a 1-based linear position.
    pub fn resolve(&self, pos: u32) -> (String, u32) {
        match self.offsets.range(..pos).next_back() {
            Some((&off, name)) => (name.clone(), pos - off),
            None => (String::from("*"), pos),
        }
    }
}

/// Named graphs sharing one node arena.
#[derive(Default)]
pub struct GraphMan {
    nodes: Arc<NodeMap>,
    graphs: BTreeMap<String, Graph>,
    defs: BTreeMap<String, GraphDef>,
    contig_offsets: BTreeMap<u32, String>,
    meta: BTreeMap<String, String>,
    pop_size: usize,
}

impl GraphMan {
    pub fn new() -> GraphMan {
        GraphMan::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.graphs.keys().cloned().collect()
    }

    pub fn at(&self, label: &str) -> Result<&Graph> {
        self.graphs
            .get(label)
            .ok_or_else(|| Error::InvalidInput(format!("unknown graph label \"{}\"", label)))
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    pub fn pop_size(&self) -> usize {
        self.pop_size
    }

    pub fn resolver(&self) -> ContigResolver {
        ContigResolver {
            offsets: self.contig_offsets.clone(),
        }
    }

    /// Resolve a 1-based linear position to (contig, 1-based position).
    pub fn absolute_position(&self, pos: u32) -> (String, u32) {
        self.resolver().resolve(pos)
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Build the base graph over `regions` (all contigs when empty).
    pub fn create_base(
        &mut self,
        fasta_path: &str,
        vcf_path: Option<&str>,
        regions: &[Region],
        sample_filter: &[String],
        record_limit: usize,
        max_node_len: usize,
    ) -> Result<()> {
        let mut fasta = FastaSource::open(fasta_path)?;
        let regions: Vec<Region> = if regions.is_empty() {
            fasta
                .sequences()
                .iter()
                .map(|(name, _)| Region::whole(name))
                .collect()
        } else {
            regions.to_vec()
        };

        self.meta
            .insert("date".to_string(), format!("{:.0}", realtime()));
        self.meta.insert("fasta".to_string(), fasta_path.to_string());
        if let Some(vcf) = vcf_path {
            self.meta.insert("vcf".to_string(), vcf.to_string());
        }

        let mut factory = GraphFactory::new();
        factory.node_len(max_node_len).record_limit(record_limit);

        let mut arena = NodeMap::new();
        let mut next_id: NodeId = 0;
        let mut order = Vec::new();
        let mut next: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut offset: u32 = 0;

        for region in &regions {
            log::info!("building \"{}\" (offset {})", region.contig, offset);
            // The variant stream restarts per region; records outside the
            // region are filtered by position.
            let mut vcf = match vcf_path {
                Some(path) => {
                    let mut src = VariantSource::open(path)?;
                    src.set_sample_filter(sample_filter)?;
                    Some(src)
                }
                None => None,
            };
            if let Some(src) = &vcf {
                if self.pop_size == 0 {
                    self.pop_size = src.num_haplotypes();
                    self.meta
                        .insert("samples".to_string(), src.samples().join(","));
                }
            }
            let part = factory.build_region(
                &mut fasta,
                vcf.as_mut(),
                region,
                offset,
                &mut arena,
                &mut next_id,
            )?;
            self.contig_offsets.insert(offset, region.contig.clone());
            order.extend(part.order);
            next.extend(part.next);
            offset = part.end_offset;
        }

        self.nodes = Arc::new(arena);
        let base = Graph::from_parts(Arc::clone(&self.nodes), order, next, self.pop_size);
        log::info!("base graph: {}", base.statistics());
        self.graphs.insert(BASE_LABEL.to_string(), base);
        self.defs.insert(
            BASE_LABEL.to_string(),
            GraphDef {
                parent: String::new(),
                kind: DefKind::Base,
            },
        );
        Ok(())
    }

    /// Parse a `;`-separated region list such as `"x:0-100;y"`.
    pub fn parse_regions(spec: &str) -> Result<Vec<Region>> {
        spec.split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_region)
            .collect()
    }

    // ------------------------------------------------------------------
    // Derivation
    // ------------------------------------------------------------------

    /// Derive a subgraph from a definition such as `a=50`, `a:b=10%`,
    /// `lin=REF`, or `path=MAXAF`. The parent is the `:`-scoped prefix of
    /// the label, with the base graph as the implied root. Returns the new
    /// label.
    pub fn derive(&mut self, def: &str) -> Result<String> {
        let (label, value) = def
            .split_once('=')
            .ok_or_else(|| Error::InvalidInput(format!("bad subgraph definition \"{}\"", def)))?;
        let label = label.trim().to_string();
        let value = value.trim();
        if label.is_empty() || value.is_empty() {
            return Err(Error::InvalidInput(format!(
                "bad subgraph definition \"{}\"",
                def
            )));
        }
        let parent_label = match label.rsplit_once(':') {
            Some((parent, _)) => parent.to_string(),
            None => BASE_LABEL.to_string(),
        };
        let parent = self.at(&parent_label)?.clone();

        let (graph, kind) = match value {
            "REF" => (parent.derive_ref()?, DefKind::Ref),
            "MAXAF" => (parent.derive_maxaf()?, DefKind::MaxAf),
            _ => {
                let filter = self.sample_subset(&parent_label, value)?;
                (parent.derive_filter(&filter)?, DefKind::Filter(filter))
            }
        };
        log::info!("derived \"{}\": {}", label, graph.statistics());
        self.graphs.insert(label.clone(), graph);
        self.defs.insert(
            label.clone(),
            GraphDef {
                parent: parent_label,
                kind,
            },
        );
        Ok(label)
    }

    /// Random haplotype subset of a parent graph: `N` haplotypes or `N%`
    /// of the parent's haplotypes.
    fn sample_subset(&self, parent: &str, value: &str) -> Result<Population> {
        if self.pop_size == 0 {
            return Err(Error::InvalidInput(
                "cannot select samples: the base graph was built without a variant file"
                    .to_string(),
            ));
        }
        let available: Vec<usize> = match self.defs.get(parent).map(|d| &d.kind) {
            Some(DefKind::Filter(pop)) => pop.indices(),
            _ => (0..self.pop_size).collect(),
        };
        let count = if let Some(pct) = value.strip_suffix('%') {
            let pct: usize = pct.parse().map_err(|_| {
                Error::InvalidInput(format!("bad sample percentage \"{}\"", value))
            })?;
            (available.len() * pct.min(100)).div_ceil(100)
        } else {
            let n: usize = value
                .parse()
                .map_err(|_| Error::InvalidInput(format!("bad sample count \"{}\"", value)))?;
            n.min(available.len())
        };
        let mut chosen = available;
        chosen.shuffle(&mut rand::thread_rng());
        chosen.truncate(count);
        Ok(Population::with_indices(self.pop_size, &chosen))
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn write(&self, path: &str) -> Result<()> {
        let out: Box<dyn Write> = if path.is_empty() || path == "-" {
            Box::new(std::io::stdout())
        } else {
            Box::new(BufWriter::new(File::create(path)?))
        };
        self.write_to(out)
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> Result<()> {
        writeln!(out, "@vgraph")?;
        for (k, v) in &self.meta {
            writeln!(out, "{}\t{}", k, v)?;
        }

        writeln!(out, "\n@contigs")?;
        for (off, name) in &self.contig_offsets {
            writeln!(out, "{}\t{}", off, name)?;
        }

        writeln!(out, "\n@graphs")?;
        for (label, graph) in &self.graphs {
            let order: Vec<String> = graph.order().iter().map(u32::to_string).collect();
            write!(out, "{}\t{}\t", label, order.join(","))?;
            let mut froms: Vec<&NodeId> = graph.next_map().keys().collect();
            froms.sort_unstable();
            for from in froms {
                let tos: Vec<String> = graph.next_map()[from].iter().map(u32::to_string).collect();
                write!(out, "{}:{};", from, tos.join(","))?;
            }
            writeln!(out)?;
        }

        writeln!(out, "\n@nodes")?;
        let mut ids: Vec<&NodeId> = self.nodes.keys().collect();
        ids.sort_unstable();
        for id in ids {
            let node = &self.nodes[id];
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                id,
                node.end_pos(),
                node.af(),
                if node.is_pinched() { 1 } else { 0 },
                node.seq().len()
            )?;
            writeln!(out, "{}", node.seq_str())?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let file = File::open(path.as_ref())?;
        self.open_from(BufReader::new(file))
    }

    pub fn open_from<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let mut lines = reader.lines();

        // Leading comments and blank lines, then the magic line.
        let magic = loop {
            match lines.next() {
                Some(line) => {
                    let line = line?;
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    break line;
                }
                None => return Err(Error::InvalidInput("empty graph file".to_string())),
            }
        };
        if magic != "@vgraph" {
            return Err(Error::InvalidInput(
                "not a graph file (missing @vgraph)".to_string(),
            ));
        }

        self.meta.clear();
        self.contig_offsets.clear();
        self.graphs.clear();
        self.defs.clear();
        self.pop_size = 0;

        let mut section = "@vgraph".to_string();
        let mut raw_graphs: Vec<(String, Vec<NodeId>, HashMap<NodeId, Vec<NodeId>>)> = Vec::new();
        let mut arena = NodeMap::new();
        let mut pending_node: Option<(NodeId, u32, f32, bool, usize)> = None;

        for line in lines {
            let line = line?;
            if pending_node.is_none() && line.is_empty() {
                continue;
            }
            if pending_node.is_none() && line.starts_with('@') {
                section = line;
                continue;
            }
            match section.as_str() {
                "@vgraph" => {
                    let (k, v) = line.split_once('\t').ok_or_else(|| {
                        Error::InvalidInput(format!("bad meta line \"{}\"", line))
                    })?;
                    self.meta.insert(k.to_string(), v.to_string());
                }
                "@contigs" => {
                    let (off, name) = line.split_once('\t').ok_or_else(|| {
                        Error::InvalidInput(format!("bad contig line \"{}\"", line))
                    })?;
                    let off: u32 = off.parse().map_err(|_| {
                        Error::InvalidInput(format!("bad contig offset \"{}\"", off))
                    })?;
                    self.contig_offsets.insert(off, name.to_string());
                }
                "@graphs" => {
                    raw_graphs.push(parse_graph_line(&line)?);
                }
                "@nodes" => match pending_node.take() {
                    None => {
                        pending_node = Some(parse_node_meta(&line)?);
                        if let Some((id, ..)) = pending_node {
                            if arena.contains_key(&id) {
                                return Err(Error::InvalidInput(format!(
                                    "duplicate node id {}",
                                    id
                                )));
                            }
                        }
                    }
                    Some((id, end_pos, af, pinched, seq_len)) => {
                        if line.len() != seq_len {
                            return Err(Error::InvalidInput(format!(
                                "node {} sequence length {} does not match declared {}",
                                id,
                                line.len(),
                                seq_len
                            )));
                        }
                        let mut node = Node::new(id);
                        node.set_seq_str(&line);
                        node.set_end_pos(end_pos);
                        node.set_af(af);
                        node.set_pinched(pinched);
                        arena.insert(id, node);
                    }
                },
                other => {
                    return Err(Error::InvalidInput(format!(
                        "unexpected section \"{}\"",
                        other
                    )));
                }
            }
        }
        if let Some((id, ..)) = pending_node {
            return Err(Error::InvalidInput(format!(
                "node {} is missing its sequence line",
                id
            )));
        }

        // Population bitsets are not persisted; restore sample count from
        // the meta block and treat monomorphic nodes as backbone.
        self.pop_size = self
            .meta
            .get("samples")
            .map(|s| 2 * s.split(',').filter(|t| !t.is_empty()).count())
            .unwrap_or(0);
        for node in arena.values_mut() {
            node.set_population(Population::new(self.pop_size, true));
            if node.af() >= 1.0 {
                node.set_as_ref();
            } else {
                node.set_not_ref();
            }
        }

        self.nodes = Arc::new(arena);
        for (label, order, next) in raw_graphs {
            for id in &order {
                if !self.nodes.contains_key(id) {
                    return Err(Error::InvalidInput(format!(
                        "graph \"{}\" references unknown node {}",
                        label, id
                    )));
                }
            }
            let graph = Graph::from_parts(Arc::clone(&self.nodes), order, next, self.pop_size);
            self.defs.insert(
                label.clone(),
                GraphDef {
                    parent: String::new(),
                    kind: DefKind::Base,
                },
            );
            self.graphs.insert(label, graph);
        }
        if self.graphs.is_empty() {
            return Err(Error::InvalidInput("graph file defines no graphs".to_string()));
        }
        Ok(())
    }
}

fn parse_graph_line(line: &str) -> Result<(String, Vec<NodeId>, HashMap<NodeId, Vec<NodeId>>)> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 2 {
        return Err(Error::InvalidInput(format!("bad graph line \"{}\"", line)));
    }
    let label = fields[0].to_string();
    let order = fields[1]
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<NodeId>()
                .map_err(|_| Error::InvalidInput(format!("bad node id \"{}\"", t)))
        })
        .collect::<Result<Vec<NodeId>>>()?;

    let mut next: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    if let Some(edges) = fields.get(2) {
        for group in edges.split(';').filter(|g| !g.is_empty()) {
            let (from, tos) = group.split_once(':').ok_or_else(|| {
                Error::InvalidInput(format!("bad edge group \"{}\"", group))
            })?;
            let from: NodeId = from
                .parse()
                .map_err(|_| Error::InvalidInput(format!("bad node id \"{}\"", from)))?;
            for to in tos.split(',').filter(|t| !t.is_empty()) {
                let to: NodeId = to
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("bad node id \"{}\"", to)))?;
                next.entry(from).or_default().push(to);
            }
        }
    }
    Ok((label, order, next))
}

fn parse_node_meta(line: &str) -> Result<(NodeId, u32, f32, bool, usize)> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 5 {
        return Err(Error::InvalidInput(format!("bad node line \"{}\"", line)));
    }
    let bad = |what: &str| Error::InvalidInput(format!("bad node {}: \"{}\"", what, line));
    Ok((
        fields[0].parse().map_err(|_| bad("id"))?,
        fields[1].parse().map_err(|_| bad("end position"))?,
        fields[2].parse().map_err(|_| bad("frequency"))?,
        fields[3] == "1",
        fields[4].parse().map_err(|_| bad("length"))?,
    ))
}
