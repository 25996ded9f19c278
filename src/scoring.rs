// Scoring parameters and alignment result buffers.
//
// "Score" is added, "penalty" is subtracted; all values are stored as
// positive integers. A profile can also be recovered from the command line
// of a well-known aligner (`bowtie2`, `bwa mem`) so simulated benchmarks
// can mirror a production parameterization.

use crate::error::{Error, Result};

/// Highest base quality that still scales the mismatch penalty.
const QUAL_CAP: u8 = 40;

/// Aligner scoring parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoreProfile {
    /// Match bonus.
    pub match_score: u8,
    /// Mismatch penalty at base quality 0.
    pub mismatch_min: u8,
    /// Mismatch penalty at base quality 40 and above, and when no quality
    /// information is available.
    pub mismatch_max: u8,
    /// Gap-in-read open penalty.
    pub read_gopen: u8,
    /// Gap-in-read extension penalty.
    pub read_gext: u8,
    /// Gap-in-reference open penalty.
    pub ref_gopen: u8,
    /// Gap-in-reference extension penalty.
    pub ref_gext: u8,
    /// Penalty for an ambiguous read or reference base.
    pub ambig: u8,
    /// End-to-end alignment instead of local.
    pub end_to_end: bool,
}

impl Default for ScoreProfile {
    fn default() -> Self {
        ScoreProfile::new(2, 2, 3, 1)
    }
}

impl ScoreProfile {
    /// Symmetric gap penalties, fixed mismatch penalty.
    pub fn new(match_score: u8, mismatch: u8, gopen: u8, gext: u8) -> Self {
        ScoreProfile {
            match_score,
            mismatch_min: mismatch,
            mismatch_max: mismatch,
            read_gopen: gopen,
            read_gext: gext,
            ref_gopen: gopen,
            ref_gext: gext,
            ambig: 0,
            end_to_end: false,
        }
    }

    /// Distinct read/reference gap penalties.
    pub fn with_gaps(
        match_score: u8,
        mismatch: u8,
        read_gopen: u8,
        read_gext: u8,
        ref_gopen: u8,
        ref_gext: u8,
    ) -> Self {
        ScoreProfile {
            match_score,
            mismatch_min: mismatch,
            mismatch_max: mismatch,
            read_gopen,
            read_gext,
            ref_gopen,
            ref_gext,
            ambig: 0,
            end_to_end: false,
        }
    }

    /// Mismatch penalty for a base of Phred quality `q`, linearly
    /// interpolated between `mismatch_min` at q=0 and `mismatch_max` at
    /// q>=40 (integer floor).
    #[inline]
    pub fn penalty(&self, q: u8) -> u8 {
        let span = (self.mismatch_max - self.mismatch_min) as u32;
        self.mismatch_min + (span * q.min(QUAL_CAP) as u32 / QUAL_CAP as u32) as u8
    }

    /// Parse a profile from an aligner command line, e.g.
    /// `"bowtie2 --local --ma 2 --mp 6,2"` or `"bwa mem -A 1 -B 4"`.
    pub fn from_template(cl: &str) -> Result<ScoreProfile> {
        let tokens: Vec<&str> = cl.split_whitespace().collect();
        match tokens.first() {
            Some(t) if t.ends_with("bowtie2") => parse_bowtie2(&tokens[1..]),
            Some(t) if t.ends_with("bwa") => parse_bwa_mem(&tokens[1..]),
            Some(t) => Err(Error::InvalidInput(format!(
                "unrecognized aligner template \"{}\" (expected bowtie2 or bwa)",
                t
            ))),
            None => Err(Error::InvalidInput("empty aligner template".to_string())),
        }
    }
}

fn parse_u8(val: &str, flag: &str) -> Result<u8> {
    val.parse::<u8>()
        .map_err(|_| Error::InvalidInput(format!("bad value \"{}\" for {}", val, flag)))
}

fn parse_u8_pair(val: &str, flag: &str) -> Result<(u8, u8)> {
    let mut it = val.split(',');
    let a = parse_u8(it.next().unwrap_or(""), flag)?;
    let b = match it.next() {
        Some(s) => parse_u8(s, flag)?,
        None => a,
    };
    Ok((a, b))
}

/// bowtie2 defaults: end-to-end with `--ma 0`, local with `--ma 2`,
/// `--mp 6,2`, `--rdg 5,3`, `--rfg 5,3`, `--np 1`.
fn parse_bowtie2(args: &[&str]) -> Result<ScoreProfile> {
    let local = args.iter().any(|a| *a == "--local");
    let mut prof = ScoreProfile {
        match_score: if local { 2 } else { 0 },
        mismatch_min: 2,
        mismatch_max: 6,
        read_gopen: 5,
        read_gext: 3,
        ref_gopen: 5,
        ref_gext: 3,
        ambig: 1,
        end_to_end: !local,
    };
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| -> Result<&str> {
            it.next()
                .copied()
                .ok_or_else(|| Error::InvalidInput(format!("missing value for {}", flag)))
        };
        match *arg {
            "--ma" => prof.match_score = parse_u8(value("--ma")?, "--ma")?,
            "--mp" => {
                let (mx, mn) = parse_u8_pair(value("--mp")?, "--mp")?;
                prof.mismatch_max = mx;
                prof.mismatch_min = mn;
            }
            "--rdg" => {
                let (open, ext) = parse_u8_pair(value("--rdg")?, "--rdg")?;
                prof.read_gopen = open;
                prof.read_gext = ext;
            }
            "--rfg" => {
                let (open, ext) = parse_u8_pair(value("--rfg")?, "--rfg")?;
                prof.ref_gopen = open;
                prof.ref_gext = ext;
            }
            "--np" => prof.ambig = parse_u8(value("--np")?, "--np")?,
            "--end-to-end" | "--local" => {}
            _ => {}
        }
    }
    if prof.mismatch_min > prof.mismatch_max {
        return Err(Error::InvalidInput(
            "mismatch penalty minimum exceeds maximum".to_string(),
        ));
    }
    Ok(prof)
}

/// bwa mem defaults: `-A 1 -B 4 -O 6,6 -E 1,1`, local alignment.
fn parse_bwa_mem(args: &[&str]) -> Result<ScoreProfile> {
    if args.first() != Some(&"mem") {
        return Err(Error::InvalidInput(
            "only the \"bwa mem\" template is supported".to_string(),
        ));
    }
    let mut prof = ScoreProfile {
        match_score: 1,
        mismatch_min: 4,
        mismatch_max: 4,
        read_gopen: 6,
        read_gext: 1,
        ref_gopen: 6,
        ref_gext: 1,
        ambig: 1,
        end_to_end: false,
    };
    let mut it = args[1..].iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| -> Result<&str> {
            it.next()
                .copied()
                .ok_or_else(|| Error::InvalidInput(format!("missing value for {}", flag)))
        };
        match *arg {
            "-A" => prof.match_score = parse_u8(value("-A")?, "-A")?,
            "-B" => {
                let b = parse_u8(value("-B")?, "-B")?;
                prof.mismatch_min = b;
                prof.mismatch_max = b;
            }
            "-O" => {
                let (del, ins) = parse_u8_pair(value("-O")?, "-O")?;
                prof.ref_gopen = del;
                prof.read_gopen = ins;
            }
            "-E" => {
                let (del, ins) = parse_u8_pair(value("-E")?, "-E")?;
                prof.ref_gext = del;
                prof.read_gext = ins;
            }
            _ => {}
        }
    }
    Ok(prof)
}

/// Reported strand of an alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strand {
    Fwd,
    Rev,
}

impl Strand {
    pub fn to_char(self) -> char {
        match self {
            Strand::Fwd => 'F',
            Strand::Rev => 'R',
        }
    }
}

/// Per-read alignment results for one batch.
///
/// Positions are 1-indexed linear genomic coordinates of the alignment's
/// last base. Scores are bias-adjusted and may be negative in end-to-end
/// mode. Forward and reverse lists are kept separately; when the reverse
/// pass strictly improves on a score the forward list is cleared, and on
/// ties both survive (forward strand wins the reported strand).
#[derive(Clone, Debug, Default)]
pub struct Results {
    pub max_score: Vec<i32>,
    pub sub_score: Vec<i32>,
    pub max_pos_fwd: Vec<Vec<u32>>,
    pub max_pos_rev: Vec<Vec<u32>>,
    pub sub_pos_fwd: Vec<Vec<u32>>,
    pub sub_pos_rev: Vec<Vec<u32>>,
    pub profile: Option<ScoreProfile>,
}

impl Results {
    pub fn len(&self) -> usize {
        self.max_score.len()
    }

    pub fn is_empty(&self) -> bool {
        self.max_score.is_empty()
    }

    pub fn resize(&mut self, n: usize) {
        self.max_score.resize(n, 0);
        self.sub_score.resize(n, 0);
        self.max_pos_fwd.resize(n, Vec::new());
        self.max_pos_rev.resize(n, Vec::new());
        self.sub_pos_fwd.resize(n, Vec::new());
        self.sub_pos_rev.resize(n, Vec::new());
    }

    /// Strand of the primary score: forward wins ties.
    pub fn max_strand(&self, i: usize) -> Strand {
        if self.max_pos_fwd[i].is_empty() && !self.max_pos_rev[i].is_empty() {
            Strand::Rev
        } else {
            Strand::Fwd
        }
    }

    /// Strand of the sub-optimal score: forward wins ties.
    pub fn sub_strand(&self, i: usize) -> Strand {
        if self.sub_pos_fwd[i].is_empty() && !self.sub_pos_rev[i].is_empty() {
            Strand::Rev
        } else {
            Strand::Fwd
        }
    }

    /// All primary positions, forward then reverse.
    pub fn max_positions(&self, i: usize) -> Vec<u32> {
        let mut v = self.max_pos_fwd[i].clone();
        v.extend_from_slice(&self.max_pos_rev[i]);
        v
    }

    /// All sub-optimal positions, forward then reverse.
    pub fn sub_positions(&self, i: usize) -> Vec<u32> {
        let mut v = self.sub_pos_fwd[i].clone();
        v.extend_from_slice(&self.sub_pos_rev[i]);
        v
    }
}
