// Small shared helpers: the nucleotide alphabet, sequence encoding, and
// wall/CPU timing used by the stage log lines.

use std::time::{SystemTime, UNIX_EPOCH};

/// Nucleotide alphabet. The discriminants index rows of the query profile.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Base {
    A = 0,
    C = 1,
    G = 2,
    T = 3,
    N = 4,
}

impl Base {
    #[inline]
    pub fn from_char(c: u8) -> Base {
        match c {
            b'A' | b'a' => Base::A,
            b'C' | b'c' => Base::C,
            b'G' | b'g' => Base::G,
            b'T' | b't' => Base::T,
            _ => Base::N,
        }
    }

    #[inline]
    pub fn to_char(self) -> char {
        match self {
            Base::A => 'A',
            Base::C => 'C',
            Base::G => 'G',
            Base::T => 'T',
            Base::N => 'N',
        }
    }

    /// Watson-Crick complement. N complements to N.
    #[inline]
    pub fn complement(self) -> Base {
        match self {
            Base::A => Base::T,
            Base::C => Base::G,
            Base::G => Base::C,
            Base::T => Base::A,
            Base::N => Base::N,
        }
    }
}

/// Encode an ASCII sequence. Anything outside ACGT maps to N.
pub fn seq_to_num(seq: &str) -> Vec<Base> {
    seq.bytes().map(Base::from_char).collect()
}

/// Decode back to an ASCII string.
pub fn num_to_seq(seq: &[Base]) -> String {
    seq.iter().map(|b| b.to_char()).collect()
}

/// Reverse complement of an encoded sequence.
pub fn revcomp(seq: &[Base]) -> Vec<Base> {
    seq.iter().rev().map(|b| b.complement()).collect()
}

/// Seconds since the epoch, for stage timing.
pub fn realtime() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Process CPU time in seconds (user + system).
pub fn cputime() -> f64 {
    let rusage = unsafe {
        let mut rusage = std::mem::MaybeUninit::uninit();
        libc::getrusage(libc::RUSAGE_SELF, rusage.as_mut_ptr());
        rusage.assume_init()
    };
    let user = rusage.ru_utime;
    let sys = rusage.ru_stime;
    (user.tv_sec as f64 + user.tv_usec as f64 * 1e-6)
        + (sys.tv_sec as f64 + sys.tv_usec as f64 * 1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let seq = seq_to_num("ACGTN");
        assert_eq!(seq, vec![Base::A, Base::C, Base::G, Base::T, Base::N]);
        assert_eq!(num_to_seq(&seq), "ACGTN");
        assert_eq!(seq_to_num("acgtx"), seq_to_num("ACGTN"));
    }

    #[test]
    fn reverse_complement() {
        assert_eq!(num_to_seq(&revcomp(&seq_to_num("AACGT"))), "ACGTT");
        assert_eq!(num_to_seq(&revcomp(&seq_to_num("GCCAGTGC"))), "GCACTGGC");
        assert_eq!(num_to_seq(&revcomp(&seq_to_num("NNA"))), "TNN");
    }
}
