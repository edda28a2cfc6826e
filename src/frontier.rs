use parking_lot::Mutex;
use std::collections::HashSet;

/// Listing URLs already claimed for detail extraction in this run.
///
/// The only mutation is [`DedupFrontier::try_reserve`], which checks the cap,
/// checks membership and inserts under one lock.
#[derive(Debug)]
pub struct DedupFrontier {
    cap: usize,
    visited: Mutex<HashSet<String>>,
}

impl DedupFrontier {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            visited: Mutex::new(HashSet::new()),
        }
    }

    /// Claim `url` for dispatch. False for duplicates and once the cap is hit.
    pub fn try_reserve(&self, url: &str) -> bool {
        let mut visited = self.visited.lock();
        if visited.len() >= self.cap || visited.contains(url) {
            return false;
        }
        visited.insert(url.to_string())
    }

    /// Number of URLs reserved so far.
    pub fn reserved(&self) -> usize {
        self.visited.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.cap.saturating_sub(self.reserved())
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}
