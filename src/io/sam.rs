// SAM-like record streams.
//
// Tab-delimited records with the eleven standard fields followed by typed
// TAG:TYPE:VALUE triples. Only the text representation is handled; the
// aligner consumes a record reader and a record writer and never needs
// binary BAM. FASTQ and FASTA read files are ingested into the same
// record shape so the alignment pipeline has a single input type.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use bio::io::{fasta, fastq};
use flate2::read::GzDecoder;

use crate::error::{Error, Result};

/// Alignment and simulation tag names.
pub mod tags {
    /// Primary max position list.
    pub const MAX_POS: &str = "mp";
    /// Sub-optimal position list.
    pub const SUB_POS: &str = "sp";
    /// Primary max score.
    pub const MAX_SCORE: &str = "ms";
    /// Sub-optimal score.
    pub const SUB_SCORE: &str = "ss";
    /// Number of primary positions.
    pub const MAX_COUNT: &str = "mc";
    /// Number of sub-optimal positions.
    pub const SUB_COUNT: &str = "sc";
    /// Strand of the primary score.
    pub const MAX_STRAND: &str = "st";
    /// Strand of the sub-optimal score.
    pub const SUB_STRAND: &str = "su";
    /// Target graph label.
    pub const GRAPH: &str = "gd";
    /// Standard alignment-score tag, mirrors `ms`.
    pub const ALIGN_SCORE: &str = "AS";

    /// Simulated origin position (last base, 1-based linear coordinate).
    pub const ORIGIN: &str = "ro";
    /// Haplotype index the read was sampled from.
    pub const SAMPLE_INDEX: &str = "nd";
    /// Substitution errors introduced.
    pub const SUB_ERRORS: &str = "se";
    /// Indel errors introduced.
    pub const INDEL_ERRORS: &str = "ni";
    /// Variant (non-reference) nodes traversed.
    pub const VAR_NODES: &str = "vd";
    /// Variant bases traversed.
    pub const VAR_BASES: &str = "vb";
    /// Read-group level: error values are rates, not counts.
    pub const USE_RATE: &str = "rt";
    /// Read-group level: graph definition file.
    pub const GDEF_FILE: &str = "ph";

    /// Read-group id assigned to records without an RG tag.
    pub const UNGROUPED_RG: &str = "VAUGRP";
}

// ============================================================================
// Optional (aux) fields
// ============================================================================

/// Typed optional fields of one record, ordered by tag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Optional {
    fields: BTreeMap<String, (char, String)>,
}

impl Optional {
    pub fn set_int<T: Into<i64>>(&mut self, tag: &str, val: T) {
        self.fields
            .insert(tag.to_string(), ('i', val.into().to_string()));
    }

    pub fn set_float(&mut self, tag: &str, val: f32) {
        self.fields.insert(tag.to_string(), ('f', val.to_string()));
    }

    pub fn set_char(&mut self, tag: &str, val: char) {
        self.fields.insert(tag.to_string(), ('A', val.to_string()));
    }

    pub fn set_str(&mut self, tag: &str, val: &str) {
        self.fields
            .insert(tag.to_string(), ('Z', val.to_string()));
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields.get(tag).map(|(_, v)| v.as_str())
    }

    pub fn get_int(&self, tag: &str) -> Option<i64> {
        self.fields.get(tag).and_then(|(_, v)| v.parse().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Parse one `TAG:TYPE:VALUE` token.
    pub fn add(&mut self, token: &str) -> Result<()> {
        let mut parts = token.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(tag), Some(ty), Some(val)) if tag.len() == 2 && ty.len() == 1 => {
                self.fields.insert(
                    tag.to_string(),
                    (ty.chars().next().unwrap(), val.to_string()),
                );
                Ok(())
            }
            _ => Err(Error::InvalidInput(format!("bad aux field \"{}\"", token))),
        }
    }
}

impl fmt::Display for Optional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (tag, (ty, val)) in &self.fields {
            write!(f, "\t{}:{}:{}", tag, ty, val)?;
        }
        Ok(())
    }
}

// ============================================================================
// Header
// ============================================================================

/// `@SQ` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    pub name: String,
    pub len: u64,
}

/// `@RG` line: the id plus raw `TAG:value` pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadGroup {
    pub id: String,
    pub aux: BTreeMap<String, String>,
}

impl ReadGroup {
    pub fn new(id: &str) -> ReadGroup {
        ReadGroup {
            id: id.to_string(),
            aux: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, tag: &str, val: &str) {
        self.aux.insert(tag.to_string(), val.to_string());
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.aux.get(tag).map(String::as_str)
    }
}

/// `@PG` line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub id: String,
    pub name: String,
    pub command_line: String,
    pub version: String,
}

/// SAM header: version plus sequence, read-group, and program lines.
#[derive(Clone, Debug, Default)]
pub struct Header {
    pub version: String,
    pub sequences: Vec<Sequence>,
    pub read_groups: Vec<ReadGroup>,
    pub programs: Vec<Program>,
    /// Unrecognized header lines, preserved verbatim.
    pub other: Vec<String>,
}

impl Header {
    pub fn new() -> Header {
        Header {
            version: "1.0".to_string(),
            ..Header::default()
        }
    }

    pub fn add_read_group(&mut self, rg: ReadGroup) {
        self.read_groups.push(rg);
    }

    pub fn add_program(&mut self, pg: Program) {
        self.programs.push(pg);
    }

    pub fn read_group(&self, id: &str) -> Option<&ReadGroup> {
        self.read_groups.iter().find(|rg| rg.id == id)
    }

    fn parse_line(&mut self, line: &str) -> Result<()> {
        if let Some(rest) = line.strip_prefix("@HD") {
            for field in rest.split('\t').filter(|f| !f.is_empty()) {
                if let Some(vn) = field.strip_prefix("VN:") {
                    self.version = vn.to_string();
                }
            }
        } else if let Some(rest) = line.strip_prefix("@SQ") {
            let mut name = String::new();
            let mut len = 0u64;
            for field in rest.split('\t').filter(|f| !f.is_empty()) {
                if let Some(v) = field.strip_prefix("SN:") {
                    name = v.to_string();
                } else if let Some(v) = field.strip_prefix("LN:") {
                    len = v
                        .parse()
                        .map_err(|_| Error::InvalidInput(format!("bad @SQ line: {}", line)))?;
                }
            }
            self.sequences.push(Sequence { name, len });
        } else if let Some(rest) = line.strip_prefix("@RG") {
            let mut rg = ReadGroup::default();
            for field in rest.split('\t').filter(|f| !f.is_empty()) {
                match field.split_once(':') {
                    Some(("ID", v)) => rg.id = v.to_string(),
                    Some((tag, v)) => {
                        rg.aux.insert(tag.to_string(), v.to_string());
                    }
                    None => {
                        return Err(Error::InvalidInput(format!("bad @RG field: {}", field)))
                    }
                }
            }
            if rg.id.is_empty() {
                return Err(Error::InvalidInput(format!("@RG line without ID: {}", line)));
            }
            self.read_groups.push(rg);
        } else if let Some(rest) = line.strip_prefix("@PG") {
            let mut pg = Program::default();
            for field in rest.split('\t').filter(|f| !f.is_empty()) {
                match field.split_once(':') {
                    Some(("ID", v)) => pg.id = v.to_string(),
                    Some(("PN", v)) => pg.name = v.to_string(),
                    Some(("CL", v)) => pg.command_line = v.to_string(),
                    Some(("VN", v)) => pg.version = v.to_string(),
                    _ => {}
                }
            }
            self.programs.push(pg);
        } else {
            self.other.push(line.to_string());
        }
        Ok(())
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let version = if self.version.is_empty() {
            "1.0"
        } else {
            &self.version
        };
        writeln!(f, "@HD\tVN:{}", version)?;
        for sq in &self.sequences {
            writeln!(f, "@SQ\tSN:{}\tLN:{}", sq.name, sq.len)?;
        }
        for rg in &self.read_groups {
            write!(f, "@RG\tID:{}", rg.id)?;
            for (tag, val) in &rg.aux {
                write!(f, "\t{}:{}", tag, val)?;
            }
            writeln!(f)?;
        }
        for pg in &self.programs {
            write!(f, "@PG\tID:{}", pg.id)?;
            if !pg.name.is_empty() {
                write!(f, "\tPN:{}", pg.name)?;
            }
            if !pg.version.is_empty() {
                write!(f, "\tVN:{}", pg.version)?;
            }
            if !pg.command_line.is_empty() {
                write!(f, "\tCL:{}", pg.command_line)?;
            }
            writeln!(f)?;
        }
        for line in &self.other {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

// ============================================================================
// Record
// ============================================================================

/// One SAM record: the eleven standard fields plus optional tags.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub qname: String,
    pub flag: u16,
    pub rname: String,
    pub pos: u32,
    pub mapq: u8,
    pub cigar: String,
    pub rnext: String,
    pub pnext: u32,
    pub tlen: i64,
    pub seq: String,
    pub qual: String,
    pub aux: Optional,
}

impl Default for Record {
    fn default() -> Record {
        Record {
            qname: "*".to_string(),
            flag: 4,
            rname: "*".to_string(),
            pos: 0,
            mapq: 255,
            cigar: "*".to_string(),
            rnext: "*".to_string(),
            pnext: 0,
            tlen: 0,
            seq: "*".to_string(),
            qual: "*".to_string(),
            aux: Optional::default(),
        }
    }
}

impl Record {
    pub fn parse(line: &str) -> Result<Record> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11 {
            return Err(Error::InvalidInput(format!(
                "record has {} fields, expected at least 11",
                fields.len()
            )));
        }
        let bad = |what: &str| Error::InvalidInput(format!("bad {} in record: {}", what, line));
        let mut rec = Record {
            qname: fields[0].to_string(),
            flag: fields[1].parse().map_err(|_| bad("FLAG"))?,
            rname: fields[2].to_string(),
            pos: fields[3].parse().map_err(|_| bad("POS"))?,
            mapq: fields[4].parse().map_err(|_| bad("MAPQ"))?,
            cigar: fields[5].to_string(),
            rnext: fields[6].to_string(),
            pnext: fields[7].parse().map_err(|_| bad("PNEXT"))?,
            tlen: fields[8].parse().map_err(|_| bad("TLEN"))?,
            seq: fields[9].to_string(),
            qual: fields[10].to_string(),
            aux: Optional::default(),
        };
        for token in &fields[11..] {
            rec.aux.add(token)?;
        }
        Ok(rec)
    }

    /// The read group this record belongs to, or the ungrouped fallback.
    pub fn read_group(&self) -> &str {
        self.aux.get("RG").unwrap_or(tags::UNGROUPED_RG)
    }

    /// Numeric base qualities, or an empty vector when QUAL is absent.
    pub fn qualities(&self, phred_offset: u8) -> Vec<u8> {
        if self.qual == "*" || self.qual.is_empty() {
            return Vec::new();
        }
        self.qual
            .bytes()
            .map(|b| b.saturating_sub(phred_offset))
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}{}",
            self.qname,
            self.flag,
            self.rname,
            self.pos,
            self.mapq,
            self.cigar,
            self.rnext,
            self.pnext,
            self.tlen,
            self.seq,
            self.qual,
            self.aux
        )
    }
}

// ============================================================================
// Reading
// ============================================================================

fn open_text<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let inner: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(inner)))
}

/// Read file format, detected from the file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadFormat {
    Sam,
    Fastq,
    Fasta,
}

/// Identify a read file by extension; SAM is the default.
pub fn read_format(path: &str) -> ReadFormat {
    let stem = path.strip_suffix(".gz").unwrap_or(path).to_ascii_lowercase();
    if stem.ends_with(".fq") || stem.ends_with(".fastq") {
        ReadFormat::Fastq
    } else if stem.ends_with(".fa") || stem.ends_with(".fasta") || stem.ends_with(".fna") {
        ReadFormat::Fasta
    } else {
        ReadFormat::Sam
    }
}

/// Load a read file (SAM, FASTQ, or FASTA) into records.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<(Header, Vec<Record>)> {
    let name = path.as_ref().to_string_lossy().to_string();
    match read_format(&name) {
        ReadFormat::Sam => read_sam(open_text(path)?),
        ReadFormat::Fastq => {
            let mut records = Vec::new();
            for rec in fastq::Reader::new(open_text(path)?).records() {
                let rec = rec.map_err(|e| Error::InvalidInput(format!("{}: {}", name, e)))?;
                let mut out = Record {
                    qname: rec.id().to_string(),
                    seq: String::from_utf8_lossy(rec.seq()).to_string(),
                    ..Record::default()
                };
                out.qual = String::from_utf8_lossy(rec.qual()).to_string();
                records.push(out);
            }
            Ok((Header::new(), records))
        }
        ReadFormat::Fasta => {
            let mut records = Vec::new();
            for rec in fasta::Reader::new(open_text(path)?).records() {
                let rec = rec.map_err(|e| Error::InvalidInput(format!("{}: {}", name, e)))?;
                records.push(Record {
                    qname: rec.id().to_string(),
                    seq: String::from_utf8_lossy(rec.seq()).to_string(),
                    ..Record::default()
                });
            }
            Ok((Header::new(), records))
        }
    }
}

/// Parse a SAM stream into its header and records.
pub fn read_sam<R: BufRead>(reader: R) -> Result<(Header, Vec<Record>)> {
    let mut header = Header::new();
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if line.starts_with('@') {
            header.parse_line(&line)?;
        } else {
            records.push(Record::parse(&line)?);
        }
    }
    Ok((header, records))
}

// ============================================================================
// Writing
// ============================================================================

/// Record sink that emits the header up front.
pub struct SamWriter<W: Write> {
    out: W,
}

impl<W: Write> SamWriter<W> {
    pub fn new(mut out: W, header: &Header) -> Result<SamWriter<W>> {
        write!(out, "{}", header)?;
        Ok(SamWriter { out })
    }

    pub fn add_record(&mut self, rec: &Record) -> Result<()> {
        writeln!(self.out, "{}", rec)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Open a writer on a path, with `-` or the empty string meaning stdout.
pub fn writer_to(path: &str, header: &Header) -> Result<SamWriter<Box<dyn Write + Send>>> {
    let out: Box<dyn Write + Send> = if path.is_empty() || path == "-" {
        Box::new(io::stdout())
    } else {
        Box::new(BufWriter::new(File::create(path)?))
    };
    SamWriter::new(out, header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        let line = "r1\t4\t*\t0\t255\t*\t*\t0\t0\tACGT\tIIII\tRG:Z:1\tms:i:20";
        let rec = Record::parse(line).unwrap();
        assert_eq!(rec.qname, "r1");
        assert_eq!(rec.flag, 4);
        assert_eq!(rec.seq, "ACGT");
        assert_eq!(rec.read_group(), "1");
        assert_eq!(rec.aux.get_int(tags::MAX_SCORE), Some(20));
        assert_eq!(rec.to_string(), line);

        let rec = Record::parse("r2\t4\t*\t0\t255\t*\t*\t0\t0\tAC\t*").unwrap();
        assert_eq!(rec.read_group(), tags::UNGROUPED_RG);
        assert!(rec.qualities(33).is_empty());
    }

    #[test]
    fn bad_records_rejected() {
        assert!(Record::parse("short\tline").is_err());
        assert!(Record::parse("r\tx\t*\t0\t255\t*\t*\t0\t0\tA\tI").is_err());
        let mut opt = Optional::default();
        assert!(opt.add("badtag").is_err());
        assert!(opt.add("XY:i:3").is_ok());
    }

    #[test]
    fn header_round_trip() {
        let text = "@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:248956422\n@RG\tID:sim1\tgd:base\n@PG\tID:va\tPN:vargraph\n";
        let (header, records) = read_sam(text.as_bytes()).unwrap();
        assert!(records.is_empty());
        assert_eq!(header.version, "1.6");
        assert_eq!(header.sequences[0].name, "chr1");
        assert_eq!(header.read_group("sim1").unwrap().get("gd"), Some("base"));
        assert_eq!(header.programs[0].name, "vargraph");

        let rendered = header.to_string();
        let (reparsed, _) = read_sam(rendered.as_bytes()).unwrap();
        assert_eq!(reparsed.version, header.version);
        assert_eq!(reparsed.read_groups, header.read_groups);
    }

    #[test]
    fn qualities_apply_offset() {
        let mut rec = Record::default();
        rec.qual = "I5+".to_string();
        assert_eq!(rec.qualities(33), vec![40, 20, 10]);
    }

    #[test]
    fn format_detection() {
        assert_eq!(read_format("reads.sam"), ReadFormat::Sam);
        assert_eq!(read_format("reads.fq.gz"), ReadFormat::Fastq);
        assert_eq!(read_format("reads.FASTA"), ReadFormat::Fasta);
        assert_eq!(read_format("reads"), ReadFormat::Sam);
    }

    #[test]
    fn writer_emits_header_then_records() {
        let header = Header::new();
        let mut buf = Vec::new();
        {
            let mut w = SamWriter::new(&mut buf, &header).unwrap();
            w.add_record(&Record::default()).unwrap();
            w.flush().unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("@HD\tVN:1.0"));
        assert!(lines.next().unwrap().starts_with("*\t4\t*"));
    }
}
