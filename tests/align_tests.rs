// Engine-level alignment scenarios: scoring schemes, graph bubbles,
// indels across node edges, strand handling, and sub-optimal tracking.

use vargraph::align::{ByteAligner, ByteAlignerEte, Engine, WordAligner, WordAlignerEte};
use vargraph::graph::{Graph, Node, Population};
use vargraph::scoring::{Results, ScoreProfile, Strand};
use vargraph::utils::seq_to_num;

fn reads(seqs: &[&str]) -> Vec<Vec<vargraph::utils::Base>> {
    seqs.iter().map(|s| seq_to_num(s)).collect()
}

fn linear_graph(seq: &str) -> Graph {
    Graph::assemble(vec![Node::with_seq(seq, seq.len() as u32 - 1)], &[])
}

/// The shared bubble fixture:
///
/// ```text
///      GGG
///     /   \
///  AAA     TTTA
///     \   /
///      CCC(ref)
/// ```
fn bubble_graph() -> Graph {
    let mut n0 = Node::with_seq("AAA", 2);
    n0.set_population(Population::with_indices(3, &[1, 2]));
    let mut n1 = Node::with_seq("CCC", 5);
    n1.set_af(0.4);
    n1.set_population(Population::with_indices(3, &[2]));
    let mut n2 = Node::with_seq("GGG", 5);
    n2.set_not_ref();
    n2.set_af(0.6);
    n2.set_population(Population::with_indices(3, &[1]));
    let mut n3 = Node::with_seq("TTTA", 9);
    n3.set_af(0.3);
    n3.set_population(Population::with_indices(3, &[1, 2]));
    Graph::assemble(vec![n0, n1, n2, n3], &[(0, 1), (0, 2), (1, 3), (2, 3)])
}

#[test]
fn local_alignment_with_soft_ends() {
    //  Read:      ACGGTTGCGTTAA-TCCGCCACG
    //                 ||||||||| ||||||
    //  Reference: TAACTTGCGTTAAATCCGCCTGG
    let g = linear_graph("TAACTTGCGTTAAATCCGCCTGG");
    let mut a = ByteAligner::new(22, ScoreProfile::new(2, 6, 5, 3)).unwrap();
    let res = a.align(&reads(&["ACGGTTGCGTTAATCCGCCACG"]), &g).unwrap();
    assert_eq!(res.max_score[0], 22);
    assert_eq!(res.max_pos_fwd[0], vec![20]);
}

#[test]
fn end_to_end_with_internal_gap() {
    //  Read:      GACTGGGCGATCTCGACTTCG
    //             |||||  |||||||||| |||
    //  Reference: GACTG--CGATCTCGACATCG
    let g = linear_graph("GACTGCGATCTCGACATCG");

    let mut a = ByteAlignerEte::new(21, ScoreProfile::new(0, 6, 5, 3)).unwrap();
    let res = a.align(&reads(&["GACTGGGCGATCTCGACTTCG"]), &g).unwrap();
    assert_eq!(res.max_score[0], -17);
    assert_eq!(res.max_pos_fwd[0], vec![19]);

    let mut a = WordAlignerEte::new(21, ScoreProfile::new(0, 6, 5, 3)).unwrap();
    let res = a.align(&reads(&["GACTGGGCGATCTCGACTTCG"]), &g).unwrap();
    assert_eq!(res.max_score[0], -17);
    assert_eq!(res.max_pos_fwd[0], vec![19]);
}

#[test]
fn bubble_alignment() {
    let g = bubble_graph();
    let batch = reads(&[
        "CCTT", "GGTT", "AAGG", "AACC", "AGGGT", "GG", "AAATTTA", "AAAGCCC",
    ]);
    let mut a = ByteAligner::new(7, ScoreProfile::default()).unwrap();
    let res = a.align(&batch, &g).unwrap();

    let expected = [
        (8, 8),
        (8, 8),
        (8, 5),
        (8, 5),
        (10, 7),
        (4, 5),
        (8, 10),
        (8, 6),
    ];
    for (i, &(score, pos)) in expected.iter().enumerate() {
        assert_eq!(res.max_score[i], score, "read {}", i);
        assert_eq!(res.max_pos_fwd[i][0], pos, "read {}", i);
    }
}

#[test]
fn bubble_alignment_word_parity() {
    let g = bubble_graph();
    let batch = reads(&[
        "CCTT", "GGTT", "AAGG", "AACC", "AGGGT", "GG", "AAATTTA", "AAAGCCC",
    ]);
    let mut byte = ByteAligner::new(7, ScoreProfile::default()).unwrap();
    let mut word = WordAligner::new(7, ScoreProfile::default()).unwrap();
    let res8 = byte.align(&batch, &g).unwrap();
    let res16 = word.align(&batch, &g).unwrap();
    assert_eq!(res8.max_score, res16.max_score);
    assert_eq!(res8.max_pos_fwd, res16.max_pos_fwd);
}

#[test]
fn padded_reads_score_like_full_length() {
    // Leading N padding comes from packing shorter reads into a longer
    // batch; explicit leading Ns with a zero ambig penalty match it.
    let g = bubble_graph();
    let batch = reads(&["NNNCCTT", "NNNGGTT", "NNAGGGT", "NNNNNGG"]);
    let mut a = ByteAligner::new(7, ScoreProfile::default()).unwrap();
    let res = a.align(&batch, &g).unwrap();
    assert_eq!(res.max_score[0], 8);
    assert_eq!(res.max_pos_fwd[0][0], 8);
    assert_eq!(res.max_score[2], 10);
    assert_eq!(res.max_pos_fwd[2][0], 7);
    assert_eq!(res.max_score[3], 4);
    assert_eq!(res.max_pos_fwd[3][0], 5);
}

#[test]
fn ambiguous_base_penalty() {
    let g = bubble_graph();
    let batch = reads(&["AAANGGTTTA", "AANNGGTTTA", "AAANNNTTTA"]);
    let mut prof = ScoreProfile::new(2, 2, 3, 1);
    prof.ambig = 1;
    let mut a = ByteAligner::new(10, prof).unwrap();
    let res = a.align(&batch, &g).unwrap();
    assert_eq!(res.max_score, vec![17, 14, 11]);
    for i in 0..3 {
        assert_eq!(res.max_pos_fwd[i][0], 10);
    }
}

#[test]
fn quality_modulated_mismatch() {
    let g = bubble_graph();
    let batch = reads(&["GGTCTA", "GGTCTA", "GGTCTA"]);
    let quals: Vec<Vec<u8>> = vec![
        vec![40, 40, 40, 0, 40, 40],
        vec![40, 40, 40, 10, 40, 40],
        vec![40, 40, 40, 20, 40, 40],
    ];
    let mut prof = ScoreProfile::new(2, 2, 10, 10);
    prof.mismatch_min = 2;
    prof.mismatch_max = 6;

    let mut a = ByteAligner::new(6, prof.clone()).unwrap();
    let mut res = Results::default();
    a.align_into(&batch, &quals, &g, &mut res, true).unwrap();
    assert_eq!(res.max_score, vec![8, 7, 6]);

    // Reverse strand: the mismatch quality follows the original base.
    let batch = reads(&["TAATGG", "TAATGG", "TAATGG"]);
    let mut a = ByteAligner::new(6, prof).unwrap();
    let mut res = Results::default();
    a.align_into(&batch, &quals, &g, &mut res, false).unwrap();
    assert_eq!(res.max_score, vec![8, 7, 6]);
    for i in 0..3 {
        assert_eq!(res.max_pos_rev[i][0], 10);
        assert_eq!(res.max_strand(i), Strand::Rev);
    }
}

#[test]
fn sub_optimal_on_linear_reference() {
    let g = linear_graph("AAAACCCCCCCCCCCCAAA");
    let mut a = ByteAligner::new(4, ScoreProfile::default()).unwrap();
    let res = a.align(&reads(&["AAAA"]), &g).unwrap();
    assert_eq!(res.max_score[0], 8);
    assert_eq!(res.max_pos_fwd[0], vec![4]);
    // The second-best locus must clear the primary by the radius, so the
    // trailing AAA (score 6) reports at 19 rather than anything nearer.
    assert_eq!(res.sub_score[0], 6);
    assert_eq!(res.sub_pos_fwd[0], vec![19]);
}

fn indel_graph() -> Graph {
    let n0 = Node::with_seq("ACTGCTNCAGTCAGTGNANACNCAC", 24);
    let n1 = Node::with_seq("ACGATCGTACGCNAGCTAGCCACAGTGCCCCCCTATATACGAN", 67);
    Graph::assemble(vec![n0, n1], &[(0, 1)])
}

const INDEL_READS: [&str; 10] = [
    "ACTGCTNCAGTC", // perfect, pos 12
    "ACTGCTACAGTC", // perfect with a read base over ref N
    "CCACAGCCCCCC", // two deletions
    "ACNCACACGATC", // perfect across the edge
    "ACNCAACGATCG", // one deletion across the edge
    "ACNCACCACGAT", // one insertion across the edge
    "ACTTGCTNCAGT", // one insertion
    "ACNCACCGATCG",
    "NACNCAACGATC",
    "AGCCTTACAGTG", // two insertions
];

#[test]
fn indels_across_an_edge_symmetric_gaps() {
    let g = indel_graph();
    let mut a = ByteAligner::new(12, ScoreProfile::new(2, 6, 3, 1)).unwrap();
    let res = a.align(&reads(&INDEL_READS), &g).unwrap();

    let expected = [
        (22, 12),
        (22, 12),
        (19, 58),
        (22, 31),
        (18, 32),
        (16, 30),
        (16, 11),
        (18, 32),
        (16, 31),
        (15, 52),
    ];
    for (i, &(score, pos)) in expected.iter().enumerate() {
        assert_eq!(res.max_score[i], score, "read {}", i);
        assert_eq!(res.max_pos_fwd[i][0], pos, "read {}", i);
    }
}

#[test]
fn indels_across_an_edge_asymmetric_gaps() {
    let g = indel_graph();
    let prof = ScoreProfile::with_gaps(2, 6, 4, 1, 2, 1);
    let mut a = ByteAligner::new(12, prof).unwrap();
    let res = a.align(&reads(&INDEL_READS), &g).unwrap();

    let expected = [
        (22, 12),
        (22, 12),
        (18, 58),
        (22, 31),
        (17, 32),
        (17, 30),
        (17, 11),
        (17, 32),
        (15, 31),
        (16, 52),
    ];
    for (i, &(score, pos)) in expected.iter().enumerate() {
        assert_eq!(res.max_score[i], score, "read {}", i);
        assert_eq!(res.max_pos_fwd[i][0], pos, "read {}", i);
    }
}

#[test]
fn batching_order_does_not_change_results() {
    let g = indel_graph();
    let batch = reads(&INDEL_READS);
    let mut a = ByteAligner::new(12, ScoreProfile::new(2, 6, 3, 1)).unwrap();
    let together = a.align(&batch, &g).unwrap();

    for (i, read) in batch.iter().enumerate() {
        let mut single = ByteAligner::new(12, ScoreProfile::new(2, 6, 3, 1)).unwrap();
        let alone = single.align(std::slice::from_ref(read), &g).unwrap();
        assert_eq!(alone.max_score[0], together.max_score[i]);
        assert_eq!(alone.max_pos_fwd[0], together.max_pos_fwd[i]);
        assert_eq!(alone.sub_score[0], together.sub_score[i]);
        assert_eq!(alone.sub_pos_fwd[0], together.sub_pos_fwd[i]);
    }
}

#[test]
fn splitting_a_reference_node_is_identity() {
    let seq = "TAACTTGCGTTAAATCCGCCTGG";
    let whole = linear_graph(seq);
    let mut left = Node::with_seq(&seq[..10], 9);
    left.pinch();
    let mut right = Node::with_seq(&seq[10..], 22);
    right.pinch();
    let split = Graph::assemble(vec![left, right], &[(0, 1)]);

    let batch = reads(&["ACGGTTGCGTTAATCCGCCACG", "TTGCGTTAAATC", "CCGCCTGG"]);
    let mut a = ByteAligner::new(22, ScoreProfile::new(2, 6, 5, 3)).unwrap();
    let mut b = ByteAligner::new(22, ScoreProfile::new(2, 6, 5, 3)).unwrap();
    let res_whole = a.align(&batch, &whole).unwrap();
    let res_split = b.align(&batch, &split).unwrap();
    assert_eq!(res_whole.max_score, res_split.max_score);
    assert_eq!(res_whole.max_pos_fwd, res_split.max_pos_fwd);
    assert_eq!(res_whole.sub_score, res_split.sub_score);
    assert_eq!(res_whole.sub_pos_fwd, res_split.sub_pos_fwd);
}

#[test]
fn reverse_strand_matches_forward_of_revcomp() {
    let g = linear_graph("ACGCGATCGACGATCGAACGATCGATGCCAGTGC");
    let read = "GCACTGGC";
    let rc: String = vargraph::utils::num_to_seq(&vargraph::utils::revcomp(&seq_to_num(read)));

    let mut a = ByteAligner::new(8, ScoreProfile::default()).unwrap();
    let fwd_of_rc = a.align(&reads(&[rc.as_str()]), &g).unwrap();

    let mut b = ByteAligner::new(8, ScoreProfile::default()).unwrap();
    let mut both = Results::default();
    b.align_into(&reads(&[read]), &[], &g, &mut both, false)
        .unwrap();

    assert_eq!(both.max_score[0], fwd_of_rc.max_score[0]);
    assert_eq!(both.max_pos_rev[0], fwd_of_rc.max_pos_fwd[0]);
}

#[test]
fn branched_graphs_use_max_only_tracking() {
    // MAXONLY keeps score and positions but never reports a sub score.
    let g = bubble_graph();
    let mut a =
        Engine::<vargraph::simd_abstraction::Int8Fast, false, false, true>::new(
            7,
            ScoreProfile::default(),
        )
        .unwrap();
    let res = a.align(&reads(&["AAAGCCC", "AAATTTA"]), &g).unwrap();
    assert_eq!(res.max_score[0], 8);
    assert_eq!(res.max_pos_fwd[0], vec![6]);
    assert_eq!(res.max_score[1], 8);
    assert_eq!(res.max_pos_fwd[1], vec![10]);
    assert!(res.sub_pos_fwd[0].is_empty());
    assert!(res.sub_pos_fwd[1].is_empty());
}
