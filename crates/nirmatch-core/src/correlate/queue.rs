/// Sorted per-role camera queues, built once per rebuild and consumed by pop.
use crate::model::{CamRecord, CamSlot};
use std::collections::VecDeque;

/// FIFO of camera files in capture order.
#[derive(Debug, Default)]
pub struct CamQueue {
    entries: VecDeque<CamSlot>,
}

impl CamQueue {
    /// Flatten every file of every bucket and sort by
    /// `(mtime, looks-like-copy, ctime, file name)`, all ascending.
    ///
    /// Missing stat data sorts first.
    pub fn build<'a>(buckets: impl IntoIterator<Item = &'a CamRecord>, copy_markers: &[String]) -> Self {
        let mut entries: Vec<(bool, CamSlot)> = buckets
            .into_iter()
            .flat_map(|record| {
                record.files.values().map(move |file| CamSlot {
                    role: record.role,
                    label: record.label.clone(),
                    file: file.clone(),
                })
            })
            .map(|slot| (looks_like_copy(&slot.file.name, copy_markers), slot))
            .collect();
        entries.sort_by(|(a_copy, a), (b_copy, b)| {
            a.file
                .modified
                .cmp(&b.file.modified)
                .then(a_copy.cmp(b_copy))
                .then(a.file.created.cmp(&b.file.created))
                .then(a.file.name.cmp(&b.file.name))
        });
        Self {
            entries: entries.into_iter().map(|(_, slot)| slot).collect(),
        }
    }

    pub fn pop(&mut self) -> Option<CamSlot> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Iterator for CamQueue {
    type Item = CamSlot;

    fn next(&mut self) -> Option<CamSlot> {
        self.pop()
    }
}

/// Case-insensitive match against any copy marker.
pub fn looks_like_copy(name: &str, markers: &[String]) -> bool {
    let lower = name.to_lowercase();
    markers
        .iter()
        .any(|m| lower.contains(&m.to_lowercase()))
}
