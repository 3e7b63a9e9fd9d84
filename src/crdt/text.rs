//! The mutable text replica.
//!
//! [`TextCrdt`] stores the document as character runs in document order. A
//! run is a stretch of consecutive characters inserted by one client in one
//! operation; runs split when a remote insert lands inside them, when a
//! delete covers part of them, or when a diff clips them. Within a run,
//! character k carries id `(client, counter + k)` and its origin is the
//! character before it, so splitting never changes merge semantics.
//!
//! Merge rules:
//! - Document order is the depth-first walk of the origin tree, siblings
//!   ordered descending by `(clock, client)`, where `clock` is a Lamport
//!   timestamp stamped at insert time, strictly greater than every timestamp
//!   the inserting replica had seen. A causally-later insert therefore sorts
//!   before the siblings it was typed against, so a local insert renders at
//!   the position it was typed. The order is a pure function of the run set,
//!   so delivery order is irrelevant (convergence).
//! - Duplicate characters are detected via the state vector and skipped
//!   (idempotence). Runs whose origin has not arrived yet, or whose counter
//!   leaves a gap, are parked and retried after every successful apply.
//! - Deletes tombstone runs in place; an insert anchored inside a deleted
//!   range still finds its origin and survives.

use super::update::{ClientId, DeleteRange, ItemId, RunInsert, StateVector, Update};

/// A stretch of consecutive characters from one client.
#[derive(Clone, Debug)]
struct Run {
    /// Id of the first character.
    id: ItemId,
    /// Id of the character immediately left at insertion time.
    origin: Option<ItemId>,
    /// Lamport timestamp of the inserting operation; orders siblings.
    clock: u64,
    text: String,
    /// Tombstone: the characters stay for merge resolution but render as nothing.
    deleted: bool,
}

impl Run {
    fn char_len(&self) -> u64 {
        self.text.chars().count() as u64
    }

    fn visible_len(&self) -> u64 {
        if self.deleted {
            0
        } else {
            self.char_len()
        }
    }

    /// Split at `off` characters, leaving the left part in place and
    /// returning the right part. The right part's origin is its immediate
    /// predecessor, which keeps per-character semantics intact.
    fn split_off(&mut self, off: u64) -> Run {
        debug_assert!(off > 0 && off < self.char_len());
        let byte = self
            .text
            .char_indices()
            .nth(off as usize)
            .map(|(b, _)| b)
            .expect("split offset within run");
        let right_text = self.text.split_off(byte);
        Run {
            id: self.id.advance(off),
            origin: Some(self.id.advance(off - 1)),
            clock: self.clock,
            text: right_text,
            deleted: self.deleted,
        }
    }
}

/// Outcome of attempting to integrate one remote run.
enum Integrate {
    Applied,
    Duplicate,
    Deferred(RunInsert),
}

/// A replicated text document.
///
/// All mutation goes through [`insert`](Self::insert) /
/// [`delete`](Self::delete) (local) and [`apply`](Self::apply) (remote).
/// Replicas that have applied the same set of updates render identical text.
#[derive(Clone, Debug)]
pub struct TextCrdt {
    client: ClientId,
    /// Runs in document order, tombstones included.
    runs: Vec<Run>,
    /// Next expected counter per client; local counters are assigned from it.
    state: StateVector,
    /// Highest insert timestamp seen; local inserts stamp `lamport + 1`.
    lamport: u64,
    /// Remote runs waiting for their causal dependencies.
    pending_inserts: Vec<RunInsert>,
    /// Remote deletes targeting characters that have not arrived yet.
    pending_deletes: Vec<DeleteRange>,
}

impl TextCrdt {
    /// Create an empty replica owned by `client`.
    pub fn new(client: ClientId) -> Self {
        Self {
            client,
            runs: Vec::new(),
            state: StateVector::new(),
            lamport: 0,
            pending_inserts: Vec::new(),
            pending_deletes: Vec::new(),
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Visible length in characters.
    pub fn len(&self) -> u64 {
        self.runs.iter().map(Run::visible_len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The visible text.
    pub fn text(&self) -> String {
        self.runs
            .iter()
            .filter(|r| !r.deleted)
            .map(|r| r.text.as_str())
            .collect()
    }

    /// Current state vector (next expected counter per client).
    pub fn state_vector(&self) -> StateVector {
        self.state.clone()
    }

    /// Number of updates parked for missing causal dependencies.
    pub fn pending_count(&self) -> usize {
        self.pending_inserts.len() + self.pending_deletes.len()
    }

    /// Insert `text` at visible position `pos` (clamped to the document
    /// length) and return the update to replicate.
    pub fn insert(&mut self, pos: u64, text: &str) -> Update {
        if text.is_empty() {
            return Update {
                state: self.state.clone(),
                ..Update::default()
            };
        }
        let pos = pos.min(self.len());
        let origin = if pos == 0 {
            None
        } else {
            Some(self.visible_id_at(pos - 1))
        };
        let counter = self.state.get(&self.client);
        self.lamport += 1;
        let run = RunInsert {
            id: ItemId::new(self.client, counter),
            origin,
            clock: self.lamport,
            text: text.to_string(),
        };
        let len = run.len();
        self.integrate(run.clone());
        self.state.set(self.client, counter + len);
        Update {
            inserts: vec![run],
            deletes: Vec::new(),
            state: self.state.clone(),
        }
    }

    /// Tombstone `len` visible characters starting at `pos` (clamped) and
    /// return the update to replicate.
    pub fn delete(&mut self, pos: u64, len: u64) -> Update {
        let total = self.len();
        let pos = pos.min(total);
        let len = len.min(total - pos);
        if len == 0 {
            return Update {
                state: self.state.clone(),
                ..Update::default()
            };
        }
        let deletes = self.tombstone_visible(pos, len);
        Update {
            inserts: Vec::new(),
            deletes,
            state: self.state.clone(),
        }
    }

    /// Merge a remote update. Returns `true` when anything new was applied;
    /// redelivered updates return `false` and change nothing.
    ///
    /// Updates whose causal dependencies are missing are parked and retried
    /// automatically once later updates fill the gap.
    pub fn apply(&mut self, update: &Update) -> bool {
        let mut changed = false;

        let mut insert_work = std::mem::take(&mut self.pending_inserts);
        insert_work.extend(update.inserts.iter().cloned());
        let mut delete_work = std::mem::take(&mut self.pending_deletes);
        delete_work.extend(update.deletes.iter().cloned());

        loop {
            let mut progress = false;

            let mut deferred = Vec::new();
            for ins in insert_work.drain(..) {
                match self.try_integrate(ins) {
                    Integrate::Applied => {
                        progress = true;
                        changed = true;
                    }
                    Integrate::Duplicate => {}
                    Integrate::Deferred(ins) => deferred.push(ins),
                }
            }
            insert_work = deferred;

            let mut remaining = Vec::new();
            for range in delete_work.drain(..) {
                let (did_delete, leftover) = self.try_delete(range);
                if did_delete {
                    progress = true;
                    changed = true;
                }
                remaining.extend(leftover);
            }
            delete_work = remaining;

            if !progress || (insert_work.is_empty() && delete_work.is_empty()) {
                break;
            }
        }

        self.pending_inserts = insert_work;
        self.pending_deletes = delete_work;
        changed
    }

    /// Everything the holder of `sv` is missing: the clipped insert runs in
    /// document order plus the full delete set (deletes are idempotent, so
    /// re-sending them costs nothing but bytes).
    pub fn diff_since(&self, sv: &StateVector) -> Update {
        let mut inserts = Vec::new();
        for run in &self.runs {
            let known = sv.get(&run.id.client);
            let len = run.char_len();
            if run.id.counter >= known {
                inserts.push(RunInsert {
                    id: run.id,
                    origin: run.origin,
                    clock: run.clock,
                    text: run.text.clone(),
                });
            } else if run.id.counter + len > known {
                let full = RunInsert {
                    id: run.id,
                    origin: run.origin,
                    clock: run.clock,
                    text: run.text.clone(),
                };
                inserts.push(full.clip_front(known - run.id.counter));
            }
        }
        Update {
            inserts,
            deletes: self.delete_set(),
            state: self.state.clone(),
        }
    }

    /// Full document state as a single update (diff against nothing).
    pub fn snapshot(&self) -> Update {
        self.diff_since(&StateVector::new())
    }

    // ── internals ──────────────────────────────────────────────────────

    /// Locate the run holding `id`, returning (run index, offset within run).
    fn find_run(&self, id: &ItemId) -> Option<(usize, u64)> {
        for (i, run) in self.runs.iter().enumerate() {
            if run.id.client == id.client {
                let len = run.char_len();
                if id.counter >= run.id.counter && id.counter < run.id.counter + len {
                    return Some((i, id.counter - run.id.counter));
                }
            }
        }
        None
    }

    /// Absolute character index (tombstones included) of `id`.
    fn abs_index(&self, id: &ItemId) -> Option<u64> {
        let mut acc = 0u64;
        for run in &self.runs {
            let len = run.char_len();
            if run.id.client == id.client
                && id.counter >= run.id.counter
                && id.counter < run.id.counter + len
            {
                return Some(acc + (id.counter - run.id.counter));
            }
            acc += len;
        }
        None
    }

    /// Id of the visible character at `pos`. Callers clamp `pos` first.
    fn visible_id_at(&self, pos: u64) -> ItemId {
        let mut acc = 0u64;
        for run in &self.runs {
            let vlen = run.visible_len();
            if pos < acc + vlen {
                return run.id.advance(pos - acc);
            }
            acc += vlen;
        }
        unreachable!("visible position {pos} beyond document length");
    }

    /// Split the run at `idx` so the character at `off` starts a new run.
    /// No-op when `off` already sits on a boundary.
    fn split_run(&mut self, idx: usize, off: u64) {
        if off == 0 || off >= self.runs[idx].char_len() {
            return;
        }
        let right = self.runs[idx].split_off(off);
        self.runs.insert(idx + 1, right);
    }

    /// Try to merge one remote run: duplicate portions are clipped away via
    /// the state vector, causal gaps defer the run.
    fn try_integrate(&mut self, ins: RunInsert) -> Integrate {
        if ins.is_empty() {
            return Integrate::Duplicate;
        }
        let known = self.state.get(&ins.id.client);
        let len = ins.len();
        if ins.id.counter + len <= known {
            return Integrate::Duplicate;
        }
        if ins.id.counter > known {
            // Counter gap: an earlier run from this client is still in flight.
            return Integrate::Deferred(ins);
        }
        let ins = if ins.id.counter < known {
            ins.clip_front(known - ins.id.counter)
        } else {
            ins
        };
        if let Some(origin) = &ins.origin {
            if !self.state.contains(origin) {
                return Integrate::Deferred(ins);
            }
        }
        let client = ins.id.client;
        let next = ins.id.counter + ins.len();
        self.lamport = self.lamport.max(ins.clock);
        self.integrate(ins);
        self.state.set(client, next);
        Integrate::Applied
    }

    /// Place a run whose causal dependencies are all present.
    ///
    /// The run goes directly after its origin, skipping over siblings with
    /// a greater `(clock, client)` and their subtrees. Anything the
    /// inserting replica had already seen carries a smaller clock, so the
    /// run lands before it. This is a pure function of the run set, which
    /// is what makes merge order-independent.
    fn integrate(&mut self, ins: RunInsert) {
        let (start_idx, origin_abs) = match ins.origin {
            None => (0usize, -1i64),
            Some(origin) => {
                let (i, off) = self
                    .find_run(&origin)
                    .expect("origin checked before integrate");
                // Make the origin the last character of its run.
                self.split_run(i, off + 1);
                let abs = self.abs_index(&origin).expect("origin present") as i64;
                (i + 1, abs)
            }
        };

        let mut i = start_idx;
        while i < self.runs.len() {
            let other = &self.runs[i];
            let other_origin_abs = match other.origin {
                None => -1i64,
                Some(o) => self
                    .abs_index(&o)
                    .expect("placed runs have present origins")
                    as i64,
            };
            if other_origin_abs < origin_abs {
                // Attached further left: our subtree ends here.
                break;
            }
            if other_origin_abs == origin_abs {
                let other = &self.runs[i];
                if (other.clock, other.id.client) > (ins.clock, ins.id.client) {
                    i += 1; // sibling wins the tiebreak
                } else {
                    break;
                }
            } else {
                i += 1; // inside a skipped sibling's subtree
            }
        }
        self.runs.insert(
            i,
            Run {
                id: ins.id,
                origin: ins.origin,
                clock: ins.clock,
                text: ins.text,
                deleted: false,
            },
        );
    }

    /// Tombstone the visible range `[pos, pos + len)`, returning the merged
    /// id ranges for replication.
    fn tombstone_visible(&mut self, pos: u64, len: u64) -> Vec<DeleteRange> {
        let mut ranges: Vec<DeleteRange> = Vec::new();
        let mut remaining = len;
        let mut vpos = 0u64;
        let mut i = 0usize;
        while i < self.runs.len() && remaining > 0 {
            let vlen = self.runs[i].visible_len();
            if vlen == 0 || vpos + vlen <= pos {
                vpos += vlen;
                i += 1;
                continue;
            }
            let start_off = pos.saturating_sub(vpos);
            if start_off > 0 {
                // Deletion starts inside this run: carve off the kept prefix.
                self.split_run(i, start_off);
                vpos += start_off;
                i += 1;
                continue;
            }
            let run_len = self.runs[i].char_len();
            let take = remaining.min(run_len);
            self.split_run(i, take);
            let run = &mut self.runs[i];
            run.deleted = true;
            push_merged(&mut ranges, DeleteRange::new(run.id, take));
            remaining -= take;
            i += 1;
        }
        ranges
    }

    /// Tombstone a remote range. Characters that have not arrived yet are
    /// returned as leftover ranges for the pending set.
    fn try_delete(&mut self, range: DeleteRange) -> (bool, Vec<DeleteRange>) {
        if range.len == 0 {
            return (false, Vec::new());
        }
        let known = self.state.get(&range.start.client);
        if range.start.counter >= known {
            return (false, vec![range]);
        }

        let mut leftover = Vec::new();
        let mut todo = range;
        if todo.end() > known {
            let have = known - todo.start.counter;
            leftover.push(DeleteRange::new(todo.start.advance(have), todo.len - have));
            todo.len = have;
        }

        let mut changed = false;
        while todo.len > 0 {
            let (i, off) = self
                .find_run(&todo.start)
                .expect("counters below the state vector are present");
            if off > 0 {
                self.split_run(i, off);
                continue;
            }
            let run_len = self.runs[i].char_len();
            let take = todo.len.min(run_len);
            self.split_run(i, take);
            let run = &mut self.runs[i];
            if !run.deleted {
                run.deleted = true;
                changed = true;
            }
            todo.start = todo.start.advance(take);
            todo.len -= take;
        }
        (changed, leftover)
    }

    /// All tombstoned ranges, merged where contiguous.
    fn delete_set(&self) -> Vec<DeleteRange> {
        let mut ranges: Vec<DeleteRange> = Vec::new();
        for run in &self.runs {
            if run.deleted {
                push_merged(&mut ranges, DeleteRange::new(run.id, run.char_len()));
            }
        }
        ranges
    }
}

/// Append a range, merging with the previous one when contiguous.
fn push_merged(ranges: &mut Vec<DeleteRange>, range: DeleteRange) {
    if let Some(last) = ranges.last_mut() {
        if last.start.client == range.start.client && last.end() == range.start.counter {
            last.len += range.len;
            return;
        }
    }
    ranges.push(range);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn replica() -> TextCrdt {
        TextCrdt::new(Uuid::new_v4())
    }

    /// Two fresh replicas that have both applied `seed` edits from a third.
    fn seeded_pair(seed: &str) -> (TextCrdt, TextCrdt) {
        let mut origin = replica();
        let update = origin.insert(0, seed);
        let mut a = replica();
        let mut b = replica();
        assert!(a.apply(&update));
        assert!(b.apply(&update));
        (a, b)
    }

    #[test]
    fn test_local_typing() {
        let mut doc = replica();
        doc.insert(0, "hello");
        doc.insert(5, " world");
        doc.insert(5, ",");
        assert_eq!(doc.text(), "hello, world");
        assert_eq!(doc.len(), 12);
    }

    #[test]
    fn test_local_delete() {
        let mut doc = replica();
        doc.insert(0, "hello world");
        doc.delete(5, 6);
        assert_eq!(doc.text(), "hello");
        doc.delete(0, 1);
        assert_eq!(doc.text(), "ello");
    }

    #[test]
    fn test_delete_inside_run_splits() {
        let mut doc = replica();
        doc.insert(0, "abcdef");
        doc.delete(2, 2);
        assert_eq!(doc.text(), "abef");
        // Deleting across the earlier split still works.
        doc.delete(1, 2);
        assert_eq!(doc.text(), "af");
    }

    #[test]
    fn test_insert_positions_clamped() {
        let mut doc = replica();
        doc.insert(100, "abc");
        assert_eq!(doc.text(), "abc");
        doc.delete(1, 100);
        assert_eq!(doc.text(), "a");
    }

    #[test]
    fn test_remote_apply_basic() {
        let mut a = replica();
        let mut b = replica();
        let u1 = a.insert(0, "shared");
        assert!(b.apply(&u1));
        assert_eq!(b.text(), "shared");
        let u2 = a.delete(0, 2);
        assert!(b.apply(&u2));
        assert_eq!(b.text(), "ared");
        assert_eq!(a.text(), b.text());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut a = replica();
        let mut b = replica();
        let update = a.insert(0, "once");
        assert!(b.apply(&update));
        assert!(!b.apply(&update));
        assert_eq!(b.text(), "once");

        let del = a.delete(1, 2);
        assert!(b.apply(&del));
        assert!(!b.apply(&del));
        assert_eq!(b.text(), "oe");
    }

    #[test]
    fn test_concurrent_inserts_converge_deterministically() {
        // A types "hello" at 0, B concurrently types "world" at 0 from the
        // same empty state.
        let mut a = replica();
        let mut b = replica();
        let ua = a.insert(0, "hello");
        let ub = b.insert(0, "world");
        assert!(a.apply(&ub));
        assert!(b.apply(&ua));

        assert_eq!(a.text(), b.text());
        assert_eq!(a.len(), 10);
        let text = a.text();
        assert!(
            text == "helloworld" || text == "worldhello",
            "fragments must not interleave: {text}"
        );

        // A third replica receiving the updates in the opposite order agrees.
        let mut c = replica();
        assert!(c.apply(&ub));
        assert!(c.apply(&ua));
        assert_eq!(c.text(), text);
    }

    #[test]
    fn test_insert_into_synced_content_stays_put() {
        // A replica that has only applied remote content types into the
        // middle of it; the character must render exactly where it was
        // typed, not after the content it was typed against.
        let mut origin = replica();
        let seed = origin.insert(0, "ab");
        let mut b = replica();
        assert!(b.apply(&seed));

        b.insert(1, "X");
        assert_eq!(b.text(), "aXb");

        // Same deeper inside a longer remote document.
        let long = origin.insert(2, "cdef");
        let mut c = replica();
        c.apply(&seed);
        c.apply(&long);
        c.insert(3, "Y");
        assert_eq!(c.text(), "abcYdef");

        // The edit replicates to the same position everywhere.
        let update = c.diff_since(&origin.state_vector());
        assert!(origin.apply(&update));
        assert_eq!(origin.text(), "abcYdef");
    }

    #[test]
    fn test_concurrent_insert_survives_delete() {
        // A deletes [2, 5) while B concurrently inserts "X" at 3.
        let (mut a, mut b) = seeded_pair("abcdef");
        let del = a.delete(2, 3);
        let ins = b.insert(3, "X");
        assert_eq!(a.text(), "abf");
        assert_eq!(b.text(), "abcXdef");

        assert!(a.apply(&ins));
        assert!(b.apply(&del));
        assert_eq!(a.text(), b.text());
        assert_eq!(a.text(), "abXf");
    }

    #[test]
    fn test_out_of_order_delivery_is_buffered() {
        let mut a = replica();
        let u1 = a.insert(0, "ab");
        let u2 = a.insert(2, "cd");
        let u3 = a.delete(1, 2);

        let mut b = replica();
        assert!(!b.apply(&u3)); // nothing to delete yet
        assert_eq!(b.pending_count(), 1);
        assert!(!b.apply(&u2)); // counter gap
        assert_eq!(b.pending_count(), 2);
        assert!(b.apply(&u1)); // fills the gap, drains pending
        assert_eq!(b.pending_count(), 0);
        assert_eq!(b.text(), a.text());
        assert_eq!(b.text(), "ad");
    }

    #[test]
    fn test_diff_since_returns_only_missing() {
        let mut a = replica();
        let u1 = a.insert(0, "abc");
        let mut b = replica();
        b.apply(&u1);
        let sv = b.state_vector();

        a.insert(3, "def");
        let diff = a.diff_since(&sv);
        assert_eq!(diff.inserts.len(), 1);
        assert_eq!(diff.inserts[0].text, "def");

        assert!(b.apply(&diff));
        assert_eq!(b.text(), "abcdef");
        // Same diff again is a no-op.
        assert!(!b.apply(&diff));
    }

    #[test]
    fn test_diff_clips_partially_known_runs() {
        let mut a = replica();
        let u1 = a.insert(0, "abcdef");
        let mut b = replica();
        b.apply(&u1);

        // b only knows the first 3 characters.
        let mut partial = TextCrdt::new(Uuid::new_v4());
        let clipped = Update {
            inserts: vec![RunInsert {
                id: u1.inserts[0].id,
                origin: None,
                clock: u1.inserts[0].clock,
                text: "abc".into(),
            }],
            deletes: Vec::new(),
            state: StateVector::new(),
        };
        partial.apply(&clipped);
        assert_eq!(partial.text(), "abc");

        let diff = a.diff_since(&partial.state_vector());
        assert!(partial.apply(&diff));
        assert_eq!(partial.text(), "abcdef");
    }

    #[test]
    fn test_snapshot_carries_tombstones() {
        let mut a = replica();
        a.insert(0, "hello world");
        a.delete(5, 6);
        let snapshot = a.snapshot();
        assert!(!snapshot.deletes.is_empty());

        let mut b = replica();
        assert!(b.apply(&snapshot));
        assert_eq!(b.text(), "hello");
        // Re-applying the snapshot changes nothing.
        assert!(!b.apply(&snapshot));
    }

    #[test]
    fn test_offline_edits_resync_without_duplication() {
        // The client types 20 characters while the server received nothing;
        // the server ends up with them exactly once.
        let mut client = replica();
        let mut server = replica();
        for i in 0..20 {
            client.insert(i, "x");
        }

        let diff = client.diff_since(&server.state_vector());
        assert!(server.apply(&diff));
        assert_eq!(server.text(), "x".repeat(20));

        // Redelivered queued updates are deduplicated.
        assert!(!server.apply(&diff));
        assert_eq!(server.len(), 20);
        assert_eq!(server.text(), client.text());
    }

    #[test]
    fn test_interleaved_sessions_converge() {
        let (mut a, mut b) = seeded_pair("base ");
        let ua1 = a.insert(5, "alpha");
        let ub1 = b.insert(5, "beta");
        let ua2 = a.delete(0, 2);
        let ub2 = b.insert(b.len(), "!");

        for u in [&ub1, &ub2] {
            a.apply(u);
        }
        for u in [&ua1, &ua2] {
            b.apply(u);
        }
        assert_eq!(a.text(), b.text());
        assert_eq!(a.pending_count(), 0);
        assert_eq!(b.pending_count(), 0);
    }

    #[test]
    fn test_permuted_delivery_converges() {
        // Build a pool of updates from three writers, then deliver it to
        // fresh replicas in several fixed permutations.
        let mut seeder = replica();
        let seed = seeder.insert(0, "0123456789");
        let mut a = replica();
        let mut b = replica();
        let mut c = replica();
        for r in [&mut a, &mut b, &mut c] {
            assert!(r.apply(&seed));
        }

        let mut pool = vec![
            seed,
            a.insert(3, "AAA"),
            a.delete(0, 2),
            b.insert(7, "BB"),
            b.delete(4, 3),
            c.insert(10, "C"),
        ];

        let reference = {
            let mut r = replica();
            for u in &pool {
                r.apply(u);
            }
            // Everything delivered: pending must be empty.
            assert_eq!(r.pending_count(), 0);
            r.text()
        };

        for rotation in 0..pool.len() {
            pool.rotate_left(1);
            let mut r = replica();
            for u in &pool {
                r.apply(u);
            }
            assert_eq!(r.pending_count(), 0, "rotation {rotation} left pending");
            assert_eq!(r.text(), reference, "rotation {rotation} diverged");
        }
    }

    #[test]
    fn test_multibyte_text() {
        let mut a = replica();
        a.insert(0, "héllo");
        a.insert(5, " wörld");
        a.delete(1, 1);
        let mut b = replica();
        b.apply(&a.snapshot());
        assert_eq!(b.text(), "hllo wörld");
        assert_eq!(a.text(), b.text());
    }
}
