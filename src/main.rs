use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::sync::Mutex;

use rayon::prelude::*;

use vargraph::error::{Error, Result};
use vargraph::graph::builder::DEFAULT_MAX_NODE_LEN;
use vargraph::graph::manager::{GraphMan, BASE_LABEL};
use vargraph::io::sam::{self, tags, Header, Program, ReadGroup};
use vargraph::pipeline::{self, AlignParams};
use vargraph::scoring::ScoreProfile;
use vargraph::sim::{Sim, SimProfile};
use vargraph::simd_abstraction::kernel_description;
use vargraph::utils::{cputime, realtime};

#[derive(Parser)]
#[command(name = "vargraph")]
#[command(about = "Align short reads to reference variation graphs", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
    #[arg(short = 'v', long, global = true, value_name = "INT", default_value = "3")]
    verbosity: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Define a set of graphs from a FASTA and a VCF for sim and align
    Define {
        /// Reference FASTA file
        #[arg(short = 'f', long, value_name = "REF.FA")]
        fasta: String,

        /// Variant file (vcf or vcf.gz)
        #[arg(short = 'c', long, value_name = "VAR.VCF")]
        vcf: Option<String>,

        /// Region list, e.g. "chr1:0-1000;chr2"
        #[arg(short = 'g', long, value_name = "STR")]
        region: Option<String>,

        /// Subgraph definitions, e.g. "a=50;a:b=10%;lin=MAXAF"
        #[arg(short = 's', long, value_name = "STR")]
        subgraph: Option<String>,

        /// File with sample names to restrict the catalog to
        #[arg(short = 'p', long, value_name = "FILE")]
        filter: Option<String>,

        /// Limit to the first N variant records per region
        #[arg(short = 'n', long, value_name = "N", default_value = "0")]
        limvar: usize,

        /// Maximum node sequence length
        #[arg(short = 'l', long, value_name = "N", default_value_t = DEFAULT_MAX_NODE_LEN)]
        node_len: usize,

        /// Output graph definition file (default: stdout)
        #[arg(short = 't', long, value_name = "FILE", default_value = "-")]
        out: String,
    },

    /// Simulate reads from a set of graphs
    Sim {
        /// Graph definition file
        #[arg(short = 'g', long, value_name = "FILE")]
        graph: String,

        /// Output SAM file (default: stdout)
        #[arg(short = 't', long, value_name = "FILE", default_value = "-")]
        out: String,

        /// Subgraphs to simulate from
        #[arg(short = 's', long, value_name = "S1,...", default_value = BASE_LABEL)]
        sub: String,

        /// Read length
        #[arg(short = 'l', long, value_name = "N", default_value = "50")]
        rlen: usize,

        /// Reads per read group
        #[arg(short = 'n', long, value_name = "N", default_value = "1000")]
        numreads: usize,

        /// Substitution error values, comma separated
        #[arg(short = 'm', long = "mut", value_name = "N1,...", default_value = "0")]
        muterr: String,

        /// Indel error values, comma separated
        #[arg(short = 'i', long, value_name = "N1,...", default_value = "0")]
        indel: String,

        /// Variant nodes per read, '*' for any
        #[arg(long, value_name = "N1,...", default_value = "*")]
        vnodes: String,

        /// Variant bases per read, '*' for any
        #[arg(long, value_name = "N1,...", default_value = "*")]
        vbases: String,

        /// Interpret -m and -i as rates
        #[arg(short = 'a', long)]
        rate: bool,

        /// Number of threads
        #[arg(short = 'j', long, value_name = "N")]
        threads: Option<usize>,
    },

    /// Align reads to a set of graphs
    Align {
        /// Graph definition file
        #[arg(short = 'g', long, value_name = "FILE")]
        graph: String,

        /// Reads file (SAM, FASTQ, or FASTA; optionally gzipped)
        #[arg(short = 'U', long, value_name = "FILE")]
        reads: String,

        /// Output SAM file (default: stdout)
        #[arg(short = 'S', long, value_name = "FILE", default_value = "-")]
        out: String,

        /// Aligner command-line template, e.g. "bowtie2 --local --ma 2"
        #[arg(short = 'a', long, value_name = "STR")]
        template: Option<String>,

        /// Match bonus
        #[arg(long, value_name = "N", default_value = "2")]
        ma: u8,

        /// Mismatch penalty MAX[,MIN]
        #[arg(long, value_name = "MX,MN", default_value = "2")]
        mp: String,

        /// Read gap open and extension penalties
        #[arg(long, value_name = "OPEN,EXT", default_value = "3,1")]
        rdg: String,

        /// Reference gap open and extension penalties
        #[arg(long, value_name = "OPEN,EXT", default_value = "3,1")]
        rfg: String,

        /// Ambiguous base penalty
        #[arg(long, value_name = "N", default_value = "0")]
        np: u8,

        /// End-to-end alignment instead of local
        #[arg(long)]
        ete: bool,

        /// Max score only: no positions or sub-optimal scores
        #[arg(long)]
        msonly: bool,

        /// Max score and positions only: no sub-optimal scores
        #[arg(long)]
        maxonly: bool,

        /// Align the forward strand only
        #[arg(short = 'f', long)]
        fwdonly: bool,

        /// Alignment targets "RG:label,...", '*' as wildcard read group
        #[arg(short = 't', long, value_name = "STR", default_value = "")]
        targets: String,

        /// Records per task
        #[arg(short = 'u', long, value_name = "N", default_value_t = pipeline::DEFAULT_CHUNK_SIZE)]
        chunk: usize,

        /// Phred quality offset
        #[arg(long, value_name = "N", default_value = "33")]
        phred_offset: u8,

        /// Number of threads (default: all available cores)
        #[arg(short = 'j', long, value_name = "N")]
        threads: Option<usize>,
    },

    /// Export SAM fields and tags as CSV
    Convert {
        /// Comma-separated column names or tags; prefix RG: for read-group values
        #[arg(short = 'f', long, value_name = "F1,F2,...")]
        format: String,

        /// Input SAM files
        #[arg(value_name = "FILE")]
        files: Vec<String>,
    },

    /// Query a graph definition: statistics and DOT export
    Query {
        /// Graph definition file
        #[arg(short = 'g', long, value_name = "FILE")]
        graph: String,

        /// Export a subgraph as DOT
        #[arg(short = 'd', long, value_name = "LABEL")]
        dot: Option<String>,

        /// DOT output file (default: stdout)
        #[arg(short = 't', long, value_name = "FILE", default_value = "-")]
        out: String,

        /// Print statistics for a subgraph, '-' for all
        #[arg(short = 'a', long, value_name = "LABEL")]
        stat: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    let result = match cli.command {
        Commands::Define {
            fasta,
            vcf,
            region,
            subgraph,
            filter,
            limvar,
            node_len,
            out,
        } => define_main(fasta, vcf, region, subgraph, filter, limvar, node_len, out),
        Commands::Sim {
            graph,
            out,
            sub,
            rlen,
            numreads,
            muterr,
            indel,
            vnodes,
            vbases,
            rate,
            threads,
        } => sim_main(
            graph, out, sub, rlen, numreads, muterr, indel, vnodes, vbases, rate, threads,
        ),
        Commands::Align {
            graph,
            reads,
            out,
            template,
            ma,
            mp,
            rdg,
            rfg,
            np,
            ete,
            msonly,
            maxonly,
            fwdonly,
            targets,
            chunk,
            phred_offset,
            threads,
        } => align_main(
            graph, reads, out, template, ma, mp, rdg, rfg, np, ete, msonly, maxonly, fwdonly,
            targets, chunk, phred_offset, threads,
        ),
        Commands::Convert { format, files } => convert_main(format, files),
        Commands::Query {
            graph,
            dot,
            out,
            stat,
        } => query_main(graph, dot, out, stat),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn configure_threads(threads: Option<usize>) -> usize {
    let mut num_threads = threads.unwrap_or_else(num_cpus::get);
    if num_threads < 1 {
        log::warn!("invalid thread count {}, using 1 thread", num_threads);
        num_threads = 1;
    }
    let max_threads = num_cpus::get() * 2;
    if num_threads > max_threads {
        log::warn!(
            "thread count {} exceeds recommended maximum {}, capping",
            num_threads,
            max_threads
        );
        num_threads = max_threads;
    }
    num_threads
}

#[allow(clippy::too_many_arguments)]
fn define_main(
    fasta: String,
    vcf: Option<String>,
    region: Option<String>,
    subgraph: Option<String>,
    filter: Option<String>,
    limvar: usize,
    node_len: usize,
    out: String,
) -> Result<()> {
    let regions = match &region {
        Some(spec) => GraphMan::parse_regions(spec)?,
        None => Vec::new(),
    };
    let sample_filter: Vec<String> = match &filter {
        Some(path) => fs::read_to_string(path)?
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };

    let start = realtime();
    let mut gm = GraphMan::new();
    gm.create_base(
        &fasta,
        vcf.as_deref(),
        &regions,
        &sample_filter,
        limvar,
        node_len,
    )?;
    log::info!("built base graph in {:.2} s", realtime() - start);

    if let Some(defs) = subgraph {
        for def in defs.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            gm.derive(def)?;
        }
    }

    log::info!("writing graphs to \"{}\"", out);
    gm.write(&out)
}

#[allow(clippy::too_many_arguments)]
fn sim_main(
    graph: String,
    out: String,
    sub: String,
    rlen: usize,
    numreads: usize,
    muterr: String,
    indel: String,
    vnodes: String,
    vbases: String,
    rate: bool,
    threads: Option<usize>,
) -> Result<()> {
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let num_threads = configure_threads(threads);
    let _ = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global();

    let start = realtime();
    let mut gm = GraphMan::new();
    gm.open(&graph)?;
    log::info!("loaded graphs in {:.2} s", realtime() - start);

    let labels: Vec<String> = sub
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    for label in &labels {
        gm.at(label)?;
    }

    let parse_values = |spec: &str, flag: &str| -> Result<Vec<f32>> {
        spec.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|tok| {
                if tok == "*" {
                    Ok(-1.0)
                } else {
                    tok.parse::<f32>()
                        .map_err(|_| Error::InvalidInput(format!("bad {} value \"{}\"", flag, tok)))
                }
            })
            .collect()
    };
    let muts = parse_values(&muterr, "-m")?;
    let indels = parse_values(&indel, "-i")?;
    let vnode_vals = parse_values(&vnodes, "--vnodes")?;
    let vbase_vals = parse_values(&vbases, "--vbases")?;

    // One read group per stratum and subgraph combination.
    let mut header = Header::new();
    header.add_program(Program {
        id: "VS".to_string(),
        name: "vargraph_sim".to_string(),
        command_line,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    let mut task_list: Vec<(String, String, SimProfile)> = Vec::new();
    let mut rg_serial = 0;
    for vb in &vbase_vals {
        for vn in &vnode_vals {
            for ind in &indels {
                for m in &muts {
                    let prof = SimProfile {
                        len: rlen,
                        muterr: if *m < 0.0 { 0.0 } else { *m },
                        indelerr: if *ind < 0.0 { 0.0 } else { *ind },
                        use_rate: rate,
                        var_nodes: *vn as i32,
                        var_bases: *vb as i32,
                    };
                    for label in &labels {
                        rg_serial += 1;
                        let mut rg = ReadGroup::new(&rg_serial.to_string());
                        rg.set("CN", "vargraph_sim");
                        rg.set(tags::GRAPH, label);
                        rg.set(tags::GDEF_FILE, &graph);
                        rg.set(tags::USE_RATE, if rate { "1" } else { "0" });
                        rg.set(tags::SUB_ERRORS, &prof.muterr.to_string());
                        rg.set(tags::INDEL_ERRORS, &prof.indelerr.to_string());
                        rg.set(tags::VAR_NODES, &prof.var_nodes.to_string());
                        rg.set(tags::VAR_BASES, &prof.var_bases.to_string());
                        header.add_read_group(rg);
                        task_list.push((label.clone(), rg_serial.to_string(), prof.clone()));
                    }
                }
            }
        }
    }
    log::info!(
        "{} read groups over {} subgraphs",
        task_list.len(),
        labels.len()
    );

    let writer = Mutex::new(sam::writer_to(&out, &header)?);
    let resolver = gm.resolver();
    let start = realtime();
    task_list
        .par_iter()
        .try_for_each(|(label, rg_id, prof)| -> Result<()> {
            let g = gm.at(label)?;
            let mut sim = Sim::new(g, prof.clone());
            let mut batch = sim.get_batch(numreads, &resolver);
            for rec in batch.iter_mut() {
                rec.aux.set_str("RG", rg_id);
            }
            let mut w = writer.lock().unwrap();
            for rec in &batch {
                w.add_record(rec)?;
            }
            Ok(())
        })?;
    writer.lock().unwrap().flush()?;
    log::info!("simulated reads in {:.2} s", realtime() - start);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn align_main(
    graph: String,
    reads: String,
    out: String,
    template: Option<String>,
    ma: u8,
    mp: String,
    rdg: String,
    rfg: String,
    np: u8,
    ete: bool,
    msonly: bool,
    maxonly: bool,
    fwdonly: bool,
    targets: String,
    chunk: usize,
    phred_offset: u8,
    threads: Option<usize>,
) -> Result<()> {
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");
    let num_threads = configure_threads(threads);
    log::info!("kernel: {}", kernel_description());

    let profile = match template {
        Some(tpl) => ScoreProfile::from_template(&tpl)?,
        None => {
            let pair = |spec: &str, flag: &str| -> Result<(u8, u8)> {
                let mut it = spec.split(',');
                let first = it.next().unwrap_or("");
                let a: u8 = first
                    .trim()
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("bad {} value \"{}\"", flag, spec)))?;
                let b = match it.next() {
                    Some(tok) => tok.trim().parse().map_err(|_| {
                        Error::InvalidInput(format!("bad {} value \"{}\"", flag, spec))
                    })?,
                    None => a,
                };
                Ok((a, b))
            };
            let (mismatch_max, mismatch_min) = pair(&mp, "--mp")?;
            let (read_gopen, read_gext) = pair(&rdg, "--rdg")?;
            let (ref_gopen, ref_gext) = pair(&rfg, "--rfg")?;
            ScoreProfile {
                match_score: ma,
                mismatch_min: mismatch_min.min(mismatch_max),
                mismatch_max,
                read_gopen,
                read_gext,
                ref_gopen,
                ref_gext,
                ambig: np,
                end_to_end: ete,
            }
        }
    };

    let start = realtime();
    let mut gm = GraphMan::new();
    gm.open(&graph)?;
    log::info!("loaded graphs in {:.2} s", realtime() - start);

    let (mut header, records) = sam::read_records(&reads)?;
    log::info!("{} input records", records.len());
    let (tasks, read_len) = pipeline::create_tasks(records, &targets, chunk)?;

    header.add_program(Program {
        id: "VA".to_string(),
        name: "vargraph_align".to_string(),
        command_line,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let params = AlignParams {
        profile,
        msonly,
        maxonly,
        fwdonly,
        chunk_size: chunk,
        threads: num_threads,
        phred_offset,
        targets,
    };
    let start = realtime();
    let mut writer = sam::writer_to(&out, &header)?;
    pipeline::align_all(&gm, tasks, &params, read_len, &mut writer)?;
    log::info!(
        "alignment finished: {:.2} s wall, {:.2} s cpu",
        realtime() - start,
        cputime()
    );
    Ok(())
}

fn convert_main(format: String, files: Vec<String>) -> Result<()> {
    if files.is_empty() {
        return Err(Error::InvalidInput("no input SAM files".to_string()));
    }
    let columns: Vec<String> = format
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if columns.is_empty() {
        return Err(Error::InvalidInput("empty format specifier".to_string()));
    }

    let mut warned: HashSet<String> = HashSet::new();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for file in &files {
        let (header, records) = sam::read_records(file)?;
        for rec in &records {
            let mut row = Vec::with_capacity(columns.len() + 1);
            if files.len() > 1 {
                row.push(format!("\"{}\"", file));
            }
            for col in &columns {
                let value = field_value(&header, rec, col);
                if value.is_none() && warned.insert(col.clone()) {
                    log::warn!("tag \"{}\" not present", col);
                }
                row.push(format!("\"{}\"", value.unwrap_or_else(|| "*".to_string())));
            }
            writeln!(out, "{}", row.join(","))?;
        }
    }
    Ok(())
}

/// Resolve a convert column: a standard field, a record tag, or an
/// `RG:`-prefixed read-group tag.
fn field_value(header: &Header, rec: &sam::Record, col: &str) -> Option<String> {
    match col {
        "QNAME" => return Some(rec.qname.clone()),
        "FLAG" => return Some(rec.flag.to_string()),
        "RNAME" => return Some(rec.rname.clone()),
        "POS" => return Some(rec.pos.to_string()),
        "MAPQ" => return Some(rec.mapq.to_string()),
        "CIGAR" => return Some(rec.cigar.clone()),
        "RNEXT" => return Some(rec.rnext.clone()),
        "PNEXT" => return Some(rec.pnext.to_string()),
        "TLEN" => return Some(rec.tlen.to_string()),
        "SEQ" => return Some(rec.seq.clone()),
        "QUAL" => return Some(rec.qual.clone()),
        _ => {}
    }
    if let Some(tag) = col.strip_prefix("RG:") {
        let rg = header.read_group(rec.read_group())?;
        if tag == "ID" {
            return Some(rg.id.clone());
        }
        return rg.get(tag).map(str::to_string);
    }
    rec.aux.get(col).map(str::to_string)
}

fn query_main(graph: String, dot: Option<String>, out: String, stat: Option<String>) -> Result<()> {
    let mut gm = GraphMan::new();
    gm.open(&graph)?;

    if let Some(label) = &dot {
        let rendered = gm.at(label)?.to_dot(label);
        if out.is_empty() || out == "-" {
            print!("{}", rendered);
        } else {
            fs::write(&out, rendered)?;
        }
    }

    if let Some(which) = &stat {
        if which == "-" {
            for label in gm.labels() {
                eprintln!("{} : {}", label, gm.at(&label)?.statistics());
            }
        } else {
            eprintln!("{} : {}", which, gm.at(which)?.statistics());
        }
    }

    if dot.is_none() && stat.is_none() {
        for label in gm.labels() {
            eprintln!("{} : {}", label, gm.at(&label)?.statistics());
        }
    }
    Ok(())
}
