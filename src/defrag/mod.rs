// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Defragmentation pipeline
//!
//! Consumes the assigner's output, merges each target's incoming entries
//! against the target itself and folds the merged streams into transient
//! segments. Untouched targets pass through as remote references; remote
//! segments below the configured min size are expanded and regrouped with
//! their rewritten neighbours. Committing persists all fragments atomically:
//! if any write fails, everything already written is rolled back and the
//! source segments remain authoritative.

use crate::{
    assigner::Assignment,
    file::persist_atomic,
    function_store::FunctionStore,
    merge::stream::{last_level_entry, merge_streams},
    segment::{
        block_cache::BlockPool,
        config::{SegmentConfig, SegmentFormat},
        many::{build_many, TransientMany},
        writer::{TransientOne, Writer},
        Segment, SegmentRead, FORMAT_ONE,
    },
    stop_signal::StopSignal,
    sweeper::MemorySweeper,
    value::Entry,
    Slice,
};
use std::{path::Path, sync::Arc};

/// A future segment: built bytes, or an existing segment passing through
pub enum TransientSegment {
    One(TransientOne),
    Many(TransientMany),

    /// An existing segment taken over unchanged
    Remote(Arc<Segment>),
}

impl TransientSegment {
    /// The segment's min key.
    pub fn min_key(&self) -> crate::Result<Slice> {
        match self {
            Self::One(one) => Ok(one.min_key().clone()),
            Self::Many(many) => Ok(many.meta.min_key.clone()),
            Self::Remote(segment) => Ok(segment.meta()?.min_key),
        }
    }

    /// Full file bytes; `None` for remote segments, which are already
    /// persisted.
    #[must_use]
    pub fn file_bytes(&self) -> Option<Slice> {
        match self {
            Self::One(one) => {
                let mut file = Vec::with_capacity(1 + one.bytes.len());
                file.push(FORMAT_ONE);
                file.extend_from_slice(&one.bytes);
                Some(file.into())
            }
            Self::Many(many) => Some(many.bytes.clone()),
            Self::Remote(_) => None,
        }
    }
}

enum Fragment {
    Merged(Vec<Entry>),
    Remote(Arc<Segment>),
}

/// Rewrites assigned targets into transient segments.
///
/// `remove_deletes` applies last-level semantics: merged entries that cannot
/// produce a live put are dropped. Returns `None` when the stop signal fired
/// between fragments; partial work is discarded.
pub fn run(
    assignments: Vec<Assignment>,
    remove_deletes: bool,
    created_in_level: u32,
    config: &SegmentConfig,
    functions: &FunctionStore,
    stop: &StopSignal,
) -> crate::Result<Option<Vec<TransientSegment>>> {
    let mut fragments = vec![];

    for assignment in assignments {
        if stop.is_stopped() {
            log::debug!("defrag cancelled, discarding partial work");
            return Ok(None);
        }

        if assignment.is_untouched() {
            fragments.push(Fragment::Remote(assignment.segment));
            continue;
        }

        let mut newer = vec![];

        for assignable in assignment
            .head_gap
            .into_iter()
            .chain(assignment.mid_overlap)
            .chain(assignment.tail_gap)
        {
            newer.extend(assignable.into_entries()?);
        }

        let older = assignment
            .segment
            .iter()?
            .collect::<crate::Result<Vec<_>>>()?;

        let merged = merge_streams(newer, older, functions)?;

        let merged: Vec<Entry> = if remove_deletes {
            merged.into_iter().filter_map(last_level_entry).collect()
        } else {
            merged
        };

        if !merged.is_empty() {
            fragments.push(Fragment::Merged(merged));
        }
    }

    let flat = fold_fragments(fragments, remove_deletes, created_in_level, config)?;

    let mut transients = group_into_many(flat, config)?;

    // Remote passthroughs interleave with rewrites, settle the final order
    let mut keyed = transients
        .drain(..)
        .map(|t| Ok((t.min_key()?, t)))
        .collect::<crate::Result<Vec<_>>>()?;
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(Some(keyed.into_iter().map(|(_, t)| t).collect()))
}

enum FlatSegment {
    One(TransientOne),
    Remote(Arc<Segment>),
}

/// Folds merged entry runs into size-bounded one-segments, absorbing
/// undersized remote segments into their neighbours.
fn fold_fragments(
    fragments: Vec<Fragment>,
    remove_deletes: bool,
    created_in_level: u32,
    config: &SegmentConfig,
) -> crate::Result<Vec<FlatSegment>> {
    let mut out = vec![];
    let mut writer: Option<Writer> = None;

    for fragment in fragments {
        match fragment {
            Fragment::Merged(entries) => {
                add_entries(entries, &mut writer, &mut out, config, created_in_level)?;
            }

            Fragment::Remote(segment) => {
                if segment.byte_size() < config.min_size {
                    // Too small to keep alive on its own; rewrite it together
                    // with its neighbours
                    log::trace!(
                        "expanding undersized remote segment ({} B)",
                        segment.byte_size(),
                    );

                    let entries = segment.iter()?.collect::<crate::Result<Vec<_>>>()?;

                    let entries: Vec<Entry> = if remove_deletes {
                        entries.into_iter().filter_map(last_level_entry).collect()
                    } else {
                        entries
                    };

                    add_entries(entries, &mut writer, &mut out, config, created_in_level)?;
                } else {
                    flush_writer(&mut writer, &mut out)?;
                    out.push(FlatSegment::Remote(segment));
                }
            }
        }
    }

    flush_writer(&mut writer, &mut out)?;

    Ok(out)
}

fn flush_writer(writer: &mut Option<Writer>, out: &mut Vec<FlatSegment>) -> crate::Result<()> {
    if let Some(writer) = writer.take() {
        if let Some(one) = writer.finish()? {
            out.push(FlatSegment::One(one));
        }
    }
    Ok(())
}

fn add_entries(
    entries: Vec<Entry>,
    writer: &mut Option<Writer>,
    out: &mut Vec<FlatSegment>,
    config: &SegmentConfig,
    created_in_level: u32,
) -> crate::Result<()> {
    for entry in entries {
        let w = writer.get_or_insert_with(|| Writer::new(config.clone(), created_in_level));
        w.add(&entry)?;

        if w.byte_size() as u64 >= config.min_size {
            flush_writer(writer, out)?;
        }
    }
    Ok(())
}

/// Groups consecutive rewritten one-segments into many-segment files when
/// the configuration asks for it.
fn group_into_many(
    flat: Vec<FlatSegment>,
    config: &SegmentConfig,
) -> crate::Result<Vec<TransientSegment>> {
    let max_children = match config.format {
        SegmentFormat::One => {
            return Ok(flat
                .into_iter()
                .map(|f| match f {
                    FlatSegment::One(one) => TransientSegment::One(one),
                    FlatSegment::Remote(segment) => TransientSegment::Remote(segment),
                })
                .collect());
        }
        SegmentFormat::Many { max_children } => max_children.max(2),
    };

    let mut out = vec![];
    let mut group: Vec<TransientOne> = vec![];

    let flush_group = |group: &mut Vec<TransientOne>,
                       out: &mut Vec<TransientSegment>|
     -> crate::Result<()> {
        match group.len() {
            0 => {}
            1 => {
                #[allow(clippy::expect_used)]
                out.push(TransientSegment::One(
                    group.pop().expect("group has one element"),
                ));
            }
            _ => {
                out.push(TransientSegment::Many(build_many(group)?));
                group.clear();
            }
        }
        Ok(())
    };

    for segment in flat {
        match segment {
            FlatSegment::One(one) => {
                group.push(one);

                if group.len() >= max_children {
                    flush_group(&mut group, &mut out)?;
                }
            }
            FlatSegment::Remote(remote) => {
                flush_group(&mut group, &mut out)?;
                out.push(TransientSegment::Remote(remote));
            }
        }
    }

    flush_group(&mut group, &mut out)?;

    Ok(out)
}

/// Persists transient segments as files under `dir`, all-or-nothing.
///
/// Remote segments pass through untouched. On any failure, files already
/// written in this batch are removed again and the error is surfaced; the
/// source segments stay authoritative.
pub fn persist(
    transients: &[TransientSegment],
    dir: &Path,
    first_file_id: u64,
    pool: &BlockPool,
    sweeper: &Arc<dyn MemorySweeper>,
) -> crate::Result<Vec<Arc<Segment>>> {
    let mut written = vec![];
    let mut out = vec![];
    let mut file_id = first_file_id;

    for transient in transients {
        let result = persist_one(transient, dir, &mut file_id, &mut written, pool, sweeper);

        match result {
            Ok(segment) => out.push(segment),
            Err(e) => {
                log::warn!("segment commit failed, rolling back {} files", written.len());

                for path in written {
                    if let Err(cleanup) = std::fs::remove_file(&path) {
                        log::warn!("could not remove {path:?} during rollback: {cleanup}");
                    }
                }

                return Err(e);
            }
        }
    }

    Ok(out)
}

fn persist_one(
    transient: &TransientSegment,
    dir: &Path,
    file_id: &mut u64,
    written: &mut Vec<std::path::PathBuf>,
    pool: &BlockPool,
    sweeper: &Arc<dyn MemorySweeper>,
) -> crate::Result<Arc<Segment>> {
    let Some(bytes) = transient.file_bytes() else {
        match transient {
            TransientSegment::Remote(segment) => return Ok(segment.clone()),
            _ => return Err(crate::Error::Unrecoverable),
        }
    };

    let path = dir.join(format!("{:08}.seg", *file_id));
    *file_id += 1;

    persist_atomic(&path, &bytes)?;
    written.push(path.clone());

    let file = std::fs::File::open(&path)?;

    Ok(Arc::new(Segment::load(
        Arc::new(file),
        pool.clone(),
        sweeper.clone(),
    )?))
}
