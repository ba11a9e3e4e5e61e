use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

/// One per-frame observation. A frame that matched nobody is recorded with
/// `student_id = None` so that stale votes get diluted as the window rolls.
#[derive(Debug, Clone)]
struct Observation {
    student_id: Option<i64>,
    similarity: f32,
    #[allow(dead_code)]
    observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub matched: u32,
    pub required: u32,
    pub window: u32,
    pub confirmed: bool,
}

/// K-of-N confirmation over a rolling frame window, with per-student
/// cooldown suppression after each confirmation.
///
/// State is process-local and in-memory only: a restart drops the window and
/// every cooldown, so after a restart everyone simply has to re-verify.
/// Callers pass the current time in so the voting logic stays deterministic;
/// all shared access is serialized by the owning engine.
#[derive(Debug)]
pub struct Stabilizer {
    k: u32,
    n: u32,
    cooldown: Duration,
    window: VecDeque<Observation>,
    cooldowns: HashMap<i64, DateTime<Utc>>,
}

impl Stabilizer {
    pub fn new(k: u32, n: u32, cooldown_seconds: u32) -> Self {
        debug_assert!(k >= 1 && k <= n, "confirmation requires 1 <= K <= N");
        Self {
            k,
            n,
            cooldown: Duration::seconds(cooldown_seconds as i64),
            window: VecDeque::with_capacity(n as usize),
            cooldowns: HashMap::new(),
        }
    }

    /// Append an observation, evicting the oldest once the window is full.
    pub fn update(&mut self, student_id: Option<i64>, similarity: f32, now: DateTime<Utc>) {
        if self.window.len() >= self.n as usize {
            self.window.pop_front();
        }
        self.window.push_back(Observation {
            student_id,
            similarity,
            observed_at: now,
        });
    }

    /// Return the first student meeting the K-of-N threshold and not in
    /// cooldown, with the median similarity of their qualifying votes.
    pub fn confirmed(&self, now: DateTime<Utc>) -> Option<(i64, f32)> {
        if self.window.len() < self.k as usize {
            return None;
        }

        // Group similarities per student, preserving first-seen order.
        let mut order: Vec<i64> = Vec::new();
        let mut votes: HashMap<i64, Vec<f32>> = HashMap::new();
        for obs in &self.window {
            let Some(sid) = obs.student_id else { continue };
            let entry = votes.entry(sid).or_insert_with(|| {
                order.push(sid);
                Vec::new()
            });
            entry.push(obs.similarity);
        }

        for sid in order {
            let similarities = &votes[&sid];
            if similarities.len() < self.k as usize {
                continue;
            }
            if self.in_cooldown(sid, now) {
                continue;
            }
            return Some((sid, median(similarities)));
        }

        None
    }

    /// Start (or restart) the cooldown timer for a confirmed student.
    pub fn mark_confirmed(&mut self, student_id: i64, now: DateTime<Utc>) {
        self.cooldowns.insert(student_id, now);
    }

    pub fn in_cooldown(&self, student_id: i64, now: DateTime<Utc>) -> bool {
        match self.cooldowns.get(&student_id) {
            Some(confirmed_at) => now - *confirmed_at < self.cooldown,
            None => false,
        }
    }

    /// Confirmation progress for one student, for client-side feedback.
    pub fn progress(&self, student_id: i64) -> Progress {
        let matched = self
            .window
            .iter()
            .filter(|obs| obs.student_id == Some(student_id))
            .count() as u32;

        Progress {
            matched,
            required: self.k,
            window: self.n,
            confirmed: matched >= self.k,
        }
    }

    /// Observation counts per candidate currently in the window.
    pub fn candidate_counts(&self) -> HashMap<i64, u32> {
        let mut counts = HashMap::new();
        for obs in &self.window {
            if let Some(sid) = obs.student_id {
                *counts.entry(sid).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Drop the observation window. Used at session boundaries; cooldowns
    /// are deliberately left intact.
    pub fn clear_window(&mut self) {
        self.window.clear();
    }

    /// Forget all cooldowns. Used when a fresh class starts; the window is
    /// deliberately left intact.
    pub fn reset_cooldowns(&mut self) {
        self.cooldowns.clear();
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn five_matches_out_of_ten_confirm() {
        let mut stab = Stabilizer::new(5, 10, 120);
        for i in 0..5 {
            stab.update(Some(42), 0.9, at(i));
        }
        let (sid, similarity) = stab.confirmed(at(5)).expect("5 of 10 must confirm");
        assert_eq!(sid, 42);
        assert!((similarity - 0.9).abs() < 1e-6);
    }

    #[test]
    fn four_matches_do_not_confirm() {
        let mut stab = Stabilizer::new(5, 10, 120);
        for i in 0..4 {
            stab.update(Some(42), 0.9, at(i));
        }
        // Pad the window past K with no-match frames; the count still sits
        // at four, so nothing confirms.
        stab.update(None, 0.0, at(4));
        assert_eq!(stab.confirmed(at(5)), None);
    }

    #[test]
    fn no_match_frames_dilute_votes_as_window_rolls() {
        let mut stab = Stabilizer::new(5, 10, 120);
        for i in 0..5 {
            stab.update(Some(42), 0.9, at(i));
        }
        // Ten no-match frames push every vote for 42 out of the window.
        for i in 5..15 {
            stab.update(None, 0.0, at(i));
        }
        assert_eq!(stab.confirmed(at(15)), None);
        assert_eq!(stab.window_len(), 10);
    }

    #[test]
    fn cooldown_suppresses_reconfirmation_until_it_elapses() {
        let mut stab = Stabilizer::new(5, 10, 120);
        for i in 0..5 {
            stab.update(Some(42), 0.9, at(i));
        }
        assert!(stab.confirmed(at(5)).is_some());
        stab.mark_confirmed(42, at(5));

        // Fresh matching observations inside the cooldown change nothing.
        for i in 5..10 {
            stab.update(Some(42), 0.9, at(i));
        }
        assert_eq!(stab.confirmed(at(10)), None);

        // Once the cooldown elapses the same window confirms again.
        assert!(stab.confirmed(at(5 + 120)).is_some());
    }

    #[test]
    fn cooldown_only_hides_the_cooled_student() {
        let mut stab = Stabilizer::new(2, 10, 120);
        stab.update(Some(1), 0.8, at(0));
        stab.update(Some(1), 0.8, at(1));
        stab.update(Some(2), 0.7, at(2));
        stab.update(Some(2), 0.7, at(3));

        assert_eq!(stab.confirmed(at(4)).unwrap().0, 1);
        stab.mark_confirmed(1, at(4));
        assert_eq!(stab.confirmed(at(5)).unwrap().0, 2);
    }

    #[test]
    fn confidence_is_the_median_of_window_votes() {
        let mut stab = Stabilizer::new(3, 10, 120);
        // An outlier frame must not drag the reported confidence.
        stab.update(Some(9), 0.95, at(0));
        stab.update(Some(9), 0.90, at(1));
        stab.update(Some(9), 0.10, at(2));
        let (_, similarity) = stab.confirmed(at(3)).unwrap();
        assert!((similarity - 0.90).abs() < 1e-6);
    }

    #[test]
    fn progress_reports_partial_counts() {
        let mut stab = Stabilizer::new(5, 10, 120);
        for i in 0..3 {
            stab.update(Some(42), 0.9, at(i));
        }
        let progress = stab.progress(42);
        assert_eq!(progress.matched, 3);
        assert_eq!(progress.required, 5);
        assert_eq!(progress.window, 10);
        assert!(!progress.confirmed);
    }

    #[test]
    fn clear_window_keeps_cooldowns_and_vice_versa() {
        let mut stab = Stabilizer::new(2, 5, 120);
        stab.update(Some(1), 0.9, at(0));
        stab.mark_confirmed(1, at(0));

        stab.clear_window();
        assert_eq!(stab.window_len(), 0);
        assert!(stab.in_cooldown(1, at(1)));

        stab.update(Some(1), 0.9, at(2));
        stab.reset_cooldowns();
        assert!(!stab.in_cooldown(1, at(3)));
        assert_eq!(stab.window_len(), 1);
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut stab = Stabilizer::new(2, 3, 120);
        for i in 0..50 {
            stab.update(Some(i % 4), 0.5, at(i));
        }
        assert_eq!(stab.window_len(), 3);
    }
}
