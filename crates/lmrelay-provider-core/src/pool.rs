use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use rand::Rng;

use crate::block::{BlockEntry, BlockKey, BlockMark, BlockRecord, BlockScope};
use crate::errors::RelayError;
use crate::state::{KeyStateEvent, StateSink};

/// One configured API key (or richer credential) of a channel.
#[derive(Debug)]
pub struct KeyEntry<C> {
    pub id: String,
    pub enabled: bool,
    pub weight: u32,
    pub value: Arc<C>,
}

impl<C> Clone for KeyEntry<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            enabled: self.enabled,
            weight: self.weight,
            value: Arc::clone(&self.value),
        }
    }
}

impl<C> KeyEntry<C> {
    pub fn new(id: impl Into<String>, enabled: bool, weight: u32, value: C) -> Self {
        Self {
            id: id.into(),
            enabled,
            weight,
            value: Arc::new(value),
        }
    }

    pub fn value(&self) -> &C {
        &self.value
    }
}

#[derive(Debug)]
pub struct PoolSnapshot<C> {
    pub keys: Arc<Vec<KeyEntry<C>>>,
    pub blocks: Arc<HashMap<BlockKey, BlockEntry>>,
}

impl<C> PoolSnapshot<C> {
    pub fn new(keys: Vec<KeyEntry<C>>, blocks: HashMap<BlockKey, BlockEntry>) -> Self {
        Self {
            keys: Arc::new(keys),
            blocks: Arc::new(blocks),
        }
    }

    pub fn empty() -> Self {
        Self {
            keys: Arc::new(Vec::new()),
            blocks: Arc::new(HashMap::new()),
        }
    }
}

/// How one attempt against one key failed. `retry` asks the pool to move
/// on to another key; `mark` blocks the key that failed.
#[derive(Debug)]
pub struct AttemptFailure {
    pub error: RelayError,
    pub mark: Option<BlockMark>,
    pub retry: bool,
}

impl AttemptFailure {
    pub fn fatal(error: RelayError) -> Self {
        Self {
            error,
            mark: None,
            retry: false,
        }
    }
}

/// Weighted-random key selection with mark-and-rotate retries. The
/// snapshot swaps atomically so rotation never blocks configuration
/// updates.
pub struct KeyPool<C> {
    channel: Arc<str>,
    snapshot: ArcSwap<PoolSnapshot<C>>,
    sink: Option<Arc<dyn StateSink>>,
}

impl<C> std::fmt::Debug for KeyPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("KeyPool")
            .field("channel", &self.channel)
            .field("key_count", &snapshot.keys.len())
            .field("block_count", &snapshot.blocks.len())
            .finish()
    }
}

impl<C> KeyPool<C> {
    pub fn new(
        channel: impl Into<Arc<str>>,
        snapshot: PoolSnapshot<C>,
        sink: Option<Arc<dyn StateSink>>,
    ) -> Self {
        Self {
            channel: channel.into(),
            snapshot: ArcSwap::new(Arc::new(snapshot)),
            sink,
        }
    }

    pub fn replace_snapshot(&self, snapshot: PoolSnapshot<C>) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn snapshot(&self) -> Arc<PoolSnapshot<C>> {
        self.snapshot.load_full()
    }

    pub async fn execute<T, F, Fut>(&self, scope: BlockScope, f: F) -> Result<T, RelayError>
    where
        F: FnMut(KeyEntry<C>) -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>> + Send,
    {
        self.execute_excluding(scope, None, f).await
    }

    /// Like [`execute`], but never picks `exclude`. Used when re-issuing
    /// a request that already failed on a specific key for reasons that
    /// do not warrant blocking it.
    ///
    /// [`execute`]: KeyPool::execute
    pub async fn execute_excluding<T, F, Fut>(
        &self,
        scope: BlockScope,
        exclude: Option<&str>,
        mut f: F,
    ) -> Result<T, RelayError>
    where
        F: FnMut(KeyEntry<C>) -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>> + Send,
    {
        let snapshot = self.snapshot.load_full();
        let now = SystemTime::now();

        let mut candidates: Vec<(KeyEntry<C>, u32)> = snapshot
            .keys
            .iter()
            .filter(|key| key.enabled)
            .filter(|key| exclude != Some(key.id.as_str()))
            .filter(|key| !self.is_blocked(&snapshot, &key.id, &scope, now))
            .map(|key| (key.clone(), key.weight))
            .collect();

        while !candidates.is_empty() {
            let weights: Vec<u32> = candidates.iter().map(|(_, weight)| *weight).collect();
            let picked = pick_weighted_index(&weights);
            let (key, _) = candidates.swap_remove(picked);

            match f(key.clone()).await {
                Ok(output) => return Ok(output),
                Err(failure) => {
                    if let Some(mark) = failure.mark {
                        self.apply_mark(&key.id, mark).await;
                    }
                    if failure.retry {
                        continue;
                    }
                    return Err(failure.error);
                }
            }
        }

        Err(RelayError::KeysExhausted)
    }

    fn is_blocked(
        &self,
        snapshot: &PoolSnapshot<C>,
        key_id: &str,
        scope: &BlockScope,
        now: SystemTime,
    ) -> bool {
        let all_key = BlockKey::new(key_id.to_string(), BlockScope::AllModels);
        if let Some(entry) = snapshot.blocks.get(&all_key)
            && entry.is_active(now)
        {
            return true;
        }

        if let BlockScope::Model(model) = scope {
            let model_key = BlockKey::new(key_id.to_string(), BlockScope::Model(model.clone()));
            if let Some(entry) = snapshot.blocks.get(&model_key) {
                return entry.is_active(now);
            }
        }

        false
    }

    pub async fn apply_mark(&self, key_id: &str, mark: BlockMark) {
        let now = SystemTime::now();
        let until = mark.duration.and_then(|duration| now.checked_add(duration));

        let entry = BlockEntry {
            level: mark.level,
            until,
            reason: mark.reason.clone(),
            updated_at: now,
        };
        let block_key = BlockKey::new(key_id.to_string(), mark.scope.clone());

        self.snapshot.rcu(|current| {
            // Expired blocks get dropped on every write; nothing prunes
            // them otherwise.
            let mut blocks = HashMap::with_capacity(current.blocks.len() + 1);
            for (existing_key, existing_entry) in current.blocks.iter() {
                if existing_entry.is_active(now) {
                    blocks.insert(existing_key.clone(), existing_entry.clone());
                }
            }
            blocks.insert(block_key.clone(), entry.clone());

            Arc::new(PoolSnapshot {
                keys: current.keys.clone(),
                blocks: Arc::new(blocks),
            })
        });

        if let Some(sink) = &self.sink {
            let record = BlockRecord {
                channel: self.channel.to_string(),
                key_id: key_id.to_string(),
                scope: mark.scope,
                level: mark.level,
                until,
                reason: mark.reason,
                updated_at: now,
            };
            sink.submit(KeyStateEvent::UpsertBlock(record)).await;
        }
    }
}

fn pick_weighted_index(weights: &[u32]) -> usize {
    if weights.is_empty() {
        return 0;
    }

    let total: u64 = weights.iter().map(|weight| *weight as u64).sum();
    if total == 0 {
        return rand::rng().random_range(0..weights.len());
    }

    let mut roll = rand::rng().random_range(0..total);
    for (index, weight) in weights.iter().enumerate() {
        let weight = *weight as u64;
        if roll < weight {
            return index;
        }
        roll -= weight;
    }

    weights.len() - 1
}
