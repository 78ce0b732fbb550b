//! In-process reference [`Backend`] implementation.
//!
//! Uses `parking_lot` guards over shared mutable state, the same way
//! `worker.rs`'s `Arc<RwLock<HashMap<...>>>` handler registry does. Every
//! [`crate::engine::Engine`] call already holds the single-writer guard,
//! so this backend only needs synchronous-under-lock bookkeeping, not its
//! own cross-call atomicity.

use super::{Backend, ScoredMember};
use crate::error::QueueResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, HashSet<String>>,
    scalars: HashMap<String, (String, Option<Instant>)>,
    streams: HashMap<String, VecDeque<(u64, Vec<(String, String)>)>>,
    stream_seq: HashMap<String, u64>,
}

impl State {
    fn scalar_get(&mut self, key: &str) -> Option<String> {
        match self.scalars.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                self.scalars.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

/// An in-memory [`Backend`], usable standalone by single-process embedders
/// and as the fixture for every unit/scenario test in this crate.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn hset(&self, key: &str, field: &str, value: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> QueueResult<Option<String>> {
        let state = self.state.lock();
        Ok(state.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> QueueResult<HashMap<String, String>> {
        let state = self.state.lock();
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> QueueResult<bool> {
        let mut state = self.state.lock();
        Ok(state
            .hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hexists(&self, key: &str, field: &str) -> QueueResult<bool> {
        let state = self.state.lock();
        Ok(state
            .hashes
            .get(key)
            .map(|h| h.contains_key(field))
            .unwrap_or(false))
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> QueueResult<i64> {
        let mut state = self.state.lock();
        let entry = state
            .hashes
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());
        let current: i64 = entry.parse().unwrap_or(0);
        let updated = current + delta;
        *entry = updated.to_string();
        Ok(updated)
    }

    async fn del(&self, key: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.hashes.remove(key);
        state.zsets.remove(key);
        state.lists.remove(key);
        state.sets.remove(key);
        state.scalars.remove(key);
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> QueueResult<()> {
        let mut state = self.state.lock();
        let set = state.zsets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> QueueResult<bool> {
        let mut state = self.state.lock();
        if let Some(set) = state.zsets.get_mut(key) {
            let before = set.len();
            set.retain(|(m, _)| m != member);
            return Ok(set.len() != before);
        }
        Ok(false)
    }

    async fn zpopmin(&self, key: &str) -> QueueResult<Option<ScoredMember>> {
        let mut state = self.state.lock();
        let set = match state.zsets.get_mut(key) {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(None),
        };
        let min_idx = set
            .iter()
            .enumerate()
            .min_by(|(_, (_, a)), (_, (_, b))| a.partial_cmp(b).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        Ok(Some(set.remove(min_idx)))
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: usize,
    ) -> QueueResult<Vec<ScoredMember>> {
        let state = self.state.lock();
        let mut members: Vec<ScoredMember> = state
            .zsets
            .get(key)
            .map(|s| {
                s.iter()
                    .filter(|(_, score)| *score >= min && *score <= max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        members.truncate(if limit == 0 { members.len() } else { limit });
        Ok(members)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
        let state = self.state.lock();
        let mut members: Vec<ScoredMember> = state.zsets.get(key).cloned().unwrap_or_default();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(slice_range(&members.into_iter().map(|(m, _)| m).collect::<Vec<_>>(), start, stop))
    }

    async fn zcard(&self, key: &str) -> QueueResult<u64> {
        let state = self.state.lock();
        Ok(state.zsets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn zscore(&self, key: &str, member: &str) -> QueueResult<Option<f64>> {
        let state = self.state.lock();
        Ok(state
            .zsets
            .get(key)
            .and_then(|s| s.iter().find(|(m, _)| m == member).map(|(_, sc)| *sc)))
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> QueueResult<u64> {
        let mut state = self.state.lock();
        if let Some(set) = state.zsets.get_mut(key) {
            let before = set.len();
            set.retain(|(_, score)| !(*score >= min && *score <= max));
            return Ok((before - set.len()) as u64);
        }
        Ok(0)
    }

    async fn ztrim_keep_highest(&self, key: &str, keep: u64) -> QueueResult<u64> {
        let mut state = self.state.lock();
        let set = match state.zsets.get_mut(key) {
            Some(s) => s,
            None => return Ok(0),
        };
        if set.len() as u64 <= keep {
            return Ok(0);
        }
        set.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let remove_count = set.len() - keep as usize;
        set.drain(0..remove_count);
        Ok(remove_count as u64)
    }

    async fn lpush(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn lpop(&self, key: &str) -> QueueResult<Option<String>> {
        let mut state = self.state.lock();
        Ok(state.lists.get_mut(key).and_then(|l| l.pop_front()))
    }

    async fn rpop(&self, key: &str) -> QueueResult<Option<String>> {
        let mut state = self.state.lock();
        Ok(state.lists.get_mut(key).and_then(|l| l.pop_back()))
    }

    async fn lindex(&self, key: &str, index: isize) -> QueueResult<Option<String>> {
        let state = self.state.lock();
        let list = match state.lists.get(key) {
            Some(l) => l,
            None => return Ok(None),
        };
        let idx = normalize_index(index, list.len());
        Ok(idx.and_then(|i| list.get(i).cloned()))
    }

    async fn lrem(&self, key: &str, value: &str) -> QueueResult<bool> {
        let mut state = self.state.lock();
        if let Some(list) = state.lists.get_mut(key) {
            let before = list.len();
            list.retain(|v| v != value);
            return Ok(list.len() != before);
        }
        Ok(false)
    }

    async fn llen(&self, key: &str) -> QueueResult<u64> {
        let state = self.state.lock();
        Ok(state.lists.get(key).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>> {
        let state = self.state.lock();
        let list: Vec<String> = state
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default();
        Ok(slice_range(&list, start, stop))
    }

    async fn sadd(&self, key: &str, member: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> QueueResult<bool> {
        let mut state = self.state.lock();
        Ok(state
            .sets
            .get_mut(key)
            .map(|s| s.remove(member))
            .unwrap_or(false))
    }

    async fn scard(&self, key: &str) -> QueueResult<u64> {
        let state = self.state.lock();
        Ok(state.sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn smembers(&self, key: &str) -> QueueResult<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: i64) -> QueueResult<()> {
        let mut state = self.state.lock();
        let deadline = if ttl_ms > 0 {
            Some(Instant::now() + Duration::from_millis(ttl_ms as u64))
        } else {
            None
        };
        state
            .scalars
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut state = self.state.lock();
        Ok(state.scalar_get(key))
    }

    async fn pttl(&self, key: &str) -> QueueResult<Option<i64>> {
        let state = self.state.lock();
        Ok(state.scalars.get(key).and_then(|(_, deadline)| {
            deadline.map(|d| {
                let now = Instant::now();
                if d > now {
                    (d - now).as_millis() as i64
                } else {
                    0
                }
            })
        }))
    }

    async fn incr(&self, key: &str) -> QueueResult<i64> {
        let mut state = self.state.lock();
        let current = state.scalar_get(key).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
        let updated = current + 1;
        let deadline = state.scalars.get(key).and_then(|(_, d)| *d);
        state
            .scalars
            .insert(key.to_string(), (updated.to_string(), deadline));
        Ok(updated)
    }

    async fn expire_px(&self, key: &str, ttl_ms: i64) -> QueueResult<()> {
        let mut state = self.state.lock();
        if let Some((value, _)) = state.scalars.get(key).cloned() {
            state.scalars.insert(
                key.to_string(),
                (value, Some(Instant::now() + Duration::from_millis(ttl_ms as u64))),
            );
        }
        Ok(())
    }

    async fn xadd(&self, key: &str, fields: &[(String, String)]) -> QueueResult<String> {
        let mut state = self.state.lock();
        let seq = state.stream_seq.entry(key.to_string()).or_insert(0);
        *seq += 1;
        let id = *seq;
        state
            .streams
            .entry(key.to_string())
            .or_default()
            .push_back((id, fields.to_vec()));
        Ok(format!("{id}-0"))
    }

    async fn xtrim_approx(&self, key: &str, maxlen: u64) -> QueueResult<()> {
        let mut state = self.state.lock();
        if let Some(stream) = state.streams.get_mut(key) {
            while stream.len() as u64 > maxlen {
                stream.pop_front();
            }
        }
        Ok(())
    }
}

fn normalize_index(index: isize, len: usize) -> Option<usize> {
    if index >= 0 {
        let i = index as usize;
        if i < len {
            Some(i)
        } else {
            None
        }
    } else {
        let from_end = (-index) as usize;
        if from_end <= len {
            Some(len - from_end)
        } else {
            None
        }
    }
}

fn slice_range(items: &[String], start: isize, stop: isize) -> Vec<String> {
    let len = items.len();
    if len == 0 {
        return Vec::new();
    }
    let norm = |i: isize| -> isize {
        if i < 0 {
            (len as isize + i).max(0)
        } else {
            i
        }
    };
    let start = norm(start).min(len as isize - 1).max(0) as usize;
    let stop = norm(stop).min(len as isize - 1);
    if stop < start as isize {
        return Vec::new();
    }
    items[start..=(stop as usize)].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zpopmin_returns_lowest_score_first() {
        let backend = MemoryBackend::new();
        backend.zadd("z", "b", 2.0).await.unwrap();
        backend.zadd("z", "a", 1.0).await.unwrap();
        let (member, score) = backend.zpopmin("z").await.unwrap().unwrap();
        assert_eq!(member, "a");
        assert_eq!(score, 1.0);
    }

    #[tokio::test]
    async fn expiring_scalar_expires() {
        let backend = MemoryBackend::new();
        backend.set_px("lock", "tok", 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ztrim_keeps_highest_scores() {
        let backend = MemoryBackend::new();
        for i in 0..5 {
            backend.zadd("z", &i.to_string(), i as f64).await.unwrap();
        }
        let removed = backend.ztrim_keep_highest("z", 2).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(backend.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_head_tail_push_pop() {
        let backend = MemoryBackend::new();
        backend.lpush("l", "a").await.unwrap();
        backend.lpush("l", "b").await.unwrap();
        assert_eq!(backend.rpop("l").await.unwrap(), Some("a".to_string()));
        assert_eq!(backend.rpop("l").await.unwrap(), Some("b".to_string()));
    }
}
