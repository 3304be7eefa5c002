use std::cmp::Ordering;
use std::collections::HashMap;

use log::debug;

use crate::core::header::DIGEST_LEN;
use crate::scan::Entry;

/// Placement order: leading bytes, then extension, then size.
///
/// Only a compression-ratio heuristic; ties keep their input order because
/// the sort is stable.
pub fn compare_placement(a: &Entry, b: &Entry) -> Ordering {
    a.leading_bytes
        .cmp(&b.leading_bytes)
        .then_with(|| a.extension.cmp(&b.extension))
        .then_with(|| a.size.cmp(&b.size))
}

pub fn sort_for_placement(entries: &mut [Entry]) {
    entries.sort_by(compare_placement);
}

/// Content digest to canonical member name, scoped to one build.
#[derive(Debug, Default)]
pub struct DedupTable {
    canonical: HashMap<[u8; DIGEST_LEN], String>,
}

impl DedupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `entry` as canonical if its content is new. Returns the
    /// canonical name when the content was already seen.
    pub fn observe(&mut self, entry: &Entry) -> Option<&str> {
        use std::collections::hash_map::Entry as Slot;
        match self.canonical.entry(entry.digest) {
            Slot::Occupied(slot) => Some(slot.into_mut().as_str()),
            Slot::Vacant(slot) => {
                slot.insert(entry.name.clone());
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// First occurrence of some content; its bytes go into the stream.
    Data { entry: Entry, alias_count: u32 },
    /// Later occurrence; stored as a reference to `target`.
    Link { entry: Entry, target: String },
}

impl Placement {
    pub fn entry(&self) -> &Entry {
        match self {
            Placement::Data { entry, .. } | Placement::Link { entry, .. } => entry,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Placement::Link { .. })
    }
}

/// The full write order of one build, with deduplication decided.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    placements: Vec<Placement>,
}

impl Plan {
    pub fn new(mut entries: Vec<Entry>) -> Self {
        sort_for_placement(&mut entries);

        let mut table = DedupTable::new();
        let mut canonical_slot: HashMap<[u8; DIGEST_LEN], usize> = HashMap::new();
        let mut placements = Vec::with_capacity(entries.len());

        for entry in entries {
            match table.observe(&entry) {
                Some(target) => {
                    let target = target.to_string();
                    if let Some(&slot) = canonical_slot.get(&entry.digest) {
                        if let Placement::Data { alias_count, .. } = &mut placements[slot] {
                            *alias_count = alias_count.saturating_add(1);
                        }
                    }
                    debug!("{} duplicates {}", entry.name, target);
                    placements.push(Placement::Link { entry, target });
                }
                None => {
                    canonical_slot.insert(entry.digest, placements.len());
                    placements.push(Placement::Data {
                        entry,
                        alias_count: 0,
                    });
                }
            }
        }

        Self { placements }
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn data_count(&self) -> usize {
        self.placements.iter().filter(|p| !p.is_link()).count()
    }

    pub fn link_count(&self) -> usize {
        self.placements.iter().filter(|p| p.is_link()).count()
    }

    /// Bytes of payload the writer will stream (canonical entries only).
    pub fn payload_bytes(&self) -> u64 {
        self.placements
            .iter()
            .filter_map(|p| match p {
                Placement::Data { entry, .. } => Some(entry.size),
                Placement::Link { .. } => None,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, name: &str, content: &[u8]) -> Entry {
        Entry {
            name: name.to_string(),
            size: content.len() as u64,
            digest: *blake3::hash(content).as_bytes(),
            leading_bytes: content.iter().copied().take(16).collect(),
            extension: crate::scan::extension_of(name),
            index,
        }
    }

    fn names(plan: &Plan) -> Vec<&str> {
        plan.placements().iter().map(|p| p.entry().name.as_str()).collect()
    }

    #[test]
    fn sort_key_prefers_prefix_then_extension_then_size() {
        let plan = Plan::new(vec![
            entry(0, "z.txt", b"bbbb"),
            entry(1, "y.log", b"aaaa-long"),
            entry(2, "x.txt", b"aaaa-longer"),
            entry(3, "w.log", b"aaaa-longer"),
            entry(4, "v.log", b"aaaa-lon"),
        ]);
        // prefix "aaaa-lon" < "aaaa-long" < "aaaa-longer"; the two equal
        // prefixes order by extension (log < txt).
        assert_eq!(names(&plan), vec!["v.log", "y.log", "w.log", "x.txt", "z.txt"]);
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let plan = Plan::new(vec![
            entry(0, "b.dat", b"same"),
            entry(1, "a.dat", b"same"),
            entry(2, "c.dat", b"same"),
        ]);
        assert_eq!(names(&plan), vec!["b.dat", "a.dat", "c.dat"]);
    }

    #[test]
    fn duplicates_become_links_to_first_placed() {
        let plan = Plan::new(vec![
            entry(0, "a.txt", b"hello"),
            entry(1, "b.txt", b"hello"),
            entry(2, "c.bin", &[0xFF, 0x00]),
        ]);
        assert_eq!(plan.data_count(), 2);
        assert_eq!(plan.link_count(), 1);
        assert_eq!(plan.payload_bytes(), 7);

        let link = plan
            .placements()
            .iter()
            .find(|p| p.is_link())
            .expect("link placement");
        assert_eq!(
            link,
            &Placement::Link {
                entry: entry(1, "b.txt", b"hello"),
                target: "a.txt".to_string(),
            }
        );
        let canonical = plan
            .placements()
            .iter()
            .find(|p| p.entry().name == "a.txt")
            .expect("canonical");
        assert!(matches!(canonical, Placement::Data { alias_count: 1, .. }));
    }

    #[test]
    fn links_always_follow_their_target() {
        let plan = Plan::new(vec![
            entry(0, "late.bin", b"\x00shared"),
            entry(1, "early.txt", b"\x00shared"),
            entry(2, "other", b"\x01"),
        ]);
        let mut placed = std::collections::HashSet::new();
        for p in plan.placements() {
            if let Placement::Link { target, .. } = p {
                assert!(placed.contains(target.as_str()));
            }
            placed.insert(p.entry().name.as_str());
        }
    }

    #[test]
    fn dedup_table_reports_first_name() {
        let mut table = DedupTable::new();
        assert_eq!(table.observe(&entry(0, "one", b"x")), None);
        assert_eq!(table.observe(&entry(1, "two", b"x")), Some("one"));
        assert_eq!(table.len(), 1);
    }
}
