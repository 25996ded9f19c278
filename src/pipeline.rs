// Alignment orchestration: task construction, the worker pool, and
// output tagging.
//
// Records are routed to a target graph by read group, split into bounded
// chunks, and pushed through a fixed pool of worker threads consuming a
// bounded channel. Each worker keeps one engine per (cell width, mode)
// combination it encounters. The output sink is the only synchronization
// point; a task either contributes all of its records or none.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::bounded;

use crate::align::{cell_bits, needs_wide_cells, Aligner};
use crate::error::{Error, Result};
use crate::graph::manager::GraphMan;
use crate::io::sam::{tags, Record, SamWriter};
use crate::scoring::{Results, ScoreProfile};
use crate::utils::{realtime, seq_to_num};

/// Default records per task.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Alignment run parameters.
#[derive(Clone, Debug)]
pub struct AlignParams {
    pub profile: ScoreProfile,
    /// Collect the max score only.
    pub msonly: bool,
    /// Skip sub-optimal tracking even on linear graphs.
    pub maxonly: bool,
    /// Skip the reverse-complement pass.
    pub fwdonly: bool,
    pub chunk_size: usize,
    pub threads: usize,
    pub phred_offset: u8,
    /// Read-group routing: `RG:label` pairs separated by commas, with
    /// `*` as a wildcard read group. Empty routes everything to `base`.
    pub targets: String,
}

impl Default for AlignParams {
    fn default() -> AlignParams {
        AlignParams {
            profile: ScoreProfile::default(),
            msonly: false,
            maxonly: false,
            fwdonly: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            threads: 1,
            phred_offset: 33,
            targets: String::new(),
        }
    }
}

/// A unit of work: one target graph and at most `chunk_size` records.
#[derive(Debug)]
pub struct Task {
    pub label: String,
    pub records: Vec<Record>,
}

/// Group records into per-graph tasks. Returns the tasks and the longest
/// read length seen.
pub fn create_tasks(
    records: Vec<Record>,
    targets: &str,
    chunk_size: usize,
) -> Result<(Vec<Task>, usize)> {
    let mut routes: HashMap<String, String> = HashMap::new();
    for pair in targets.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (rg, label) = pair.split_once(':').ok_or_else(|| {
            Error::InvalidInput(format!(
                "bad alignment target \"{}\" (expected RG:label)",
                pair
            ))
        })?;
        routes.insert(rg.trim().to_string(), label.trim().to_string());
    }
    let wildcard = routes
        .get("*")
        .cloned()
        .or_else(|| routes.is_empty().then(|| crate::graph::manager::BASE_LABEL.to_string()));

    let chunk_size = chunk_size.max(1);
    let mut read_len = 0usize;
    let mut by_label: HashMap<String, Vec<Record>> = HashMap::new();
    let mut dropped = 0usize;
    for rec in records {
        let rg = rec.read_group().to_string();
        let label = match routes.get(&rg).or(wildcard.as_ref()) {
            Some(label) => label.clone(),
            None => {
                dropped += 1;
                continue;
            }
        };
        if rec.seq != "*" {
            read_len = read_len.max(rec.seq.len());
        }
        by_label.entry(label).or_default().push(rec);
    }
    if dropped > 0 {
        log::warn!("{} records had no alignment target and were dropped", dropped);
    }

    let mut labels: Vec<String> = by_label.keys().cloned().collect();
    labels.sort();
    let mut tasks = Vec::new();
    for label in labels {
        let records = by_label.remove(&label).unwrap();
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            let chunk: Vec<Record> = records.by_ref().take(chunk_size).collect();
            tasks.push(Task {
                label: label.clone(),
                records: chunk,
            });
        }
    }
    Ok((tasks, read_len))
}

/// Align all tasks and write the tagged records. Returns the number of
/// records written. Record order is preserved within a task but not
/// across tasks.
pub fn align_all<W: Write + Send>(
    gm: &GraphMan,
    tasks: Vec<Task>,
    params: &AlignParams,
    read_len: usize,
    out: &mut SamWriter<W>,
) -> Result<usize> {
    if read_len == 0 {
        return Err(Error::InvalidInput(
            "no reads with sequence to align".to_string(),
        ));
    }
    let num_tasks = tasks.len();
    let threads = params.threads.max(1);
    let wide = needs_wide_cells(read_len, params.profile.match_score);
    log::info!(
        "aligning {} tasks with {} threads, read length {}, {}-bit cells",
        num_tasks,
        threads,
        read_len,
        cell_bits(wide)
    );

    let writer = Mutex::new(out);
    let first_error: Mutex<Option<Error>> = Mutex::new(None);
    let completed = AtomicUsize::new(0);
    let written = AtomicUsize::new(0);
    let start = realtime();

    thread::scope(|scope| {
        let (tx, rx) = bounded::<Task>(threads * 2);
        for _ in 0..threads {
            let rx = rx.clone();
            let writer = &writer;
            let first_error = &first_error;
            let completed = &completed;
            let written = &written;
            scope.spawn(move || {
                let mut engines: HashMap<(bool, bool), Aligner> = HashMap::new();
                while let Ok(task) = rx.recv() {
                    match run_task(gm, &task, params, read_len, wide, &mut engines) {
                        Ok(records) => {
                            let mut w = writer.lock().unwrap();
                            let mut ok = true;
                            for rec in &records {
                                if let Err(e) = w.add_record(rec) {
                                    ok = false;
                                    first_error.lock().unwrap().get_or_insert(e);
                                    break;
                                }
                            }
                            if ok {
                                written.fetch_add(records.len(), Ordering::Relaxed);
                            }
                        }
                        Err(e) => {
                            log::error!("task \"{}\" failed: {}", task.label, e);
                            first_error.lock().unwrap().get_or_insert(e);
                        }
                    }
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    log::debug!("{}/{} tasks complete", done, num_tasks);
                }
            });
        }
        for task in tasks {
            if tx.send(task).is_err() {
                break;
            }
        }
        drop(tx);
    });

    writer.lock().unwrap().flush()?;
    if let Some(err) = first_error.into_inner().unwrap() {
        return Err(err);
    }
    let count = written.load(Ordering::Relaxed);
    log::info!(
        "wrote {} records in {:.2} s",
        count,
        realtime() - start
    );
    Ok(count)
}

/// Align one task and return its tagged output records.
fn run_task(
    gm: &GraphMan,
    task: &Task,
    params: &AlignParams,
    read_len: usize,
    wide: bool,
    engines: &mut HashMap<(bool, bool), Aligner>,
) -> Result<Vec<Record>> {
    let graph = gm.at(&task.label)?;
    // Comparable high-score loci are a property of a linear reference;
    // branched graphs force max-only tracking.
    let maxonly = params.maxonly || !graph.is_linear();

    let engine = match engines.entry((wide, maxonly)) {
        std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
        std::collections::hash_map::Entry::Vacant(e) => e.insert(Aligner::new(
            read_len,
            &params.profile,
            wide,
            params.msonly,
            maxonly,
        )?),
    };

    let reads: Vec<_> = task
        .records
        .iter()
        .map(|r| {
            if r.seq == "*" {
                Vec::new()
            } else {
                seq_to_num(&r.seq)
            }
        })
        .collect();
    let quals: Vec<Vec<u8>> = task
        .records
        .iter()
        .map(|r| r.qualities(params.phred_offset))
        .collect();

    let mut res = Results::default();
    engine.align_into(&reads, &quals, graph, &mut res, params.fwdonly)?;

    let mut out = Vec::with_capacity(task.records.len());
    for (i, rec) in task.records.iter().enumerate() {
        let mut rec = rec.clone();
        rec.aux.set_str(tags::GRAPH, &task.label);
        rec.aux.set_int(tags::MAX_SCORE, res.max_score[i] as i64);
        rec.aux.set_int(tags::ALIGN_SCORE, res.max_score[i] as i64);
        if !params.msonly {
            let positions = res.max_positions(i);
            if !positions.is_empty() {
                rec.aux.set_str(tags::MAX_POS, &join_positions(&positions));
                rec.aux.set_int(tags::MAX_COUNT, positions.len() as i64);
                rec.aux.set_char(tags::MAX_STRAND, res.max_strand(i).to_char());
            }
            if !params.msonly && !maxonly {
                let sub_positions = res.sub_positions(i);
                if !sub_positions.is_empty() {
                    rec.aux.set_int(tags::SUB_SCORE, res.sub_score[i] as i64);
                    rec.aux.set_str(tags::SUB_POS, &join_positions(&sub_positions));
                    rec.aux.set_int(tags::SUB_COUNT, sub_positions.len() as i64);
                    rec.aux.set_char(tags::SUB_STRAND, res.sub_strand(i).to_char());
                }
            }
        }
        out.push(rec);
    }
    Ok(out)
}

fn join_positions(positions: &[u32]) -> String {
    positions
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
