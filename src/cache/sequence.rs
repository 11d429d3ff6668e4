//! Lazy Sequence Module
//!
//! Replays stored sequences, or forwards a producer's items while buffering
//! them and stores the buffer once the producer is exhausted.

use std::mem;
use std::pin::Pin;

use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::codec::Value;
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::store::EntryStore;

// == Cached Sequence ==
/// Iterator returned by [`CachedFunction::get_or_compute_iter`].
///
/// On a miss the full sequence is stored only after the producer yields its
/// last item; dropping the iterator early stores nothing. A failed store is
/// reported as a final `Err` item.
///
/// [`CachedFunction::get_or_compute_iter`]: crate::CachedFunction::get_or_compute_iter
pub struct CachedSequence<I> {
    state: SequenceState<I>,
}

enum SequenceState<I> {
    Replay(std::vec::IntoIter<Value>),
    Recording {
        producer: I,
        buffer: Vec<Value>,
        store: EntryStore,
        key: CacheKey,
    },
    Done,
}

impl<I> CachedSequence<I> {
    pub(crate) fn replay(items: Vec<Value>) -> Self {
        Self {
            state: SequenceState::Replay(items.into_iter()),
        }
    }

    pub(crate) fn record(producer: I, store: EntryStore, key: CacheKey) -> Self {
        Self {
            state: SequenceState::Recording {
                producer,
                buffer: Vec::new(),
                store,
                key,
            },
        }
    }

    /// True when items come from a stored entry rather than the producer.
    pub fn is_replay(&self) -> bool {
        matches!(self.state, SequenceState::Replay(_))
    }
}

impl<I> Iterator for CachedSequence<I>
where
    I: Iterator<Item = anyhow::Result<Value>>,
{
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let produced = match &mut self.state {
            SequenceState::Replay(items) => return items.next().map(Ok),
            SequenceState::Done => return None,
            SequenceState::Recording { producer, .. } => producer.next(),
        };

        match produced {
            Some(Ok(item)) => {
                if let SequenceState::Recording { buffer, .. } = &mut self.state {
                    buffer.push(item.clone());
                }
                Some(Ok(item))
            }
            Some(Err(err)) => {
                self.state = SequenceState::Done;
                Some(Err(CacheError::Compute(err)))
            }
            None => match mem::replace(&mut self.state, SequenceState::Done) {
                SequenceState::Recording {
                    buffer, store, key, ..
                } => store.put(&key, &Value::List(buffer)).err().map(Err),
                _ => None,
            },
        }
    }
}

/// Unpacks a stored sequence entry.
pub(crate) fn stored_items(value: Value, key: &CacheKey) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(CacheError::Decode(format!(
            "entry {key} holds a {} where a sequence was stored",
            other.kind()
        ))),
    }
}

// == Cached Stream ==
/// Stream counterpart of [`CachedSequence`] for asynchronous producers.
pub(crate) fn recording_stream<S>(
    producer: S,
    store: EntryStore,
    key: CacheKey,
) -> BoxStream<'static, Result<Value>>
where
    S: Stream<Item = anyhow::Result<Value>> + Send + 'static,
{
    let producer: Pin<Box<S>> = Box::pin(producer);
    stream::unfold(Some((producer, Vec::new())), move |state| {
        let store = store.clone();
        let key = key.clone();
        async move {
            let Some((mut producer, mut buffer)) = state else {
                return None;
            };
            match producer.next().await {
                Some(Ok(item)) => {
                    buffer.push(item.clone());
                    Some((Ok(item), Some((producer, buffer))))
                }
                Some(Err(err)) => Some((Err(CacheError::Compute(err)), None)),
                None => match store.put_async(key, Value::List(buffer)).await {
                    Ok(()) => None,
                    Err(err) => Some((Err(err), None)),
                },
            }
        }
    })
    .boxed()
}

pub(crate) fn replay_stream(items: Vec<Value>) -> BoxStream<'static, Result<Value>> {
    stream::iter(items.into_iter().map(Ok)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_yields_items_in_order() {
        let sequence: CachedSequence<std::iter::Empty<anyhow::Result<Value>>> =
            CachedSequence::replay(vec![Value::from(1), Value::from(2)]);
        assert!(sequence.is_replay());
        let items: Vec<Value> = sequence.map(|r| r.unwrap()).collect();
        assert_eq!(items, vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn test_recording_stores_after_exhaustion() {
        let root = tempfile::tempdir().unwrap();
        let store = EntryStore::open(root.path()).unwrap();
        let key = CacheKey::of(&Value::from("seq")).unwrap();

        let producer = (0..3).map(|i| Ok::<_, anyhow::Error>(Value::from(i)));
        let mut sequence = CachedSequence::record(producer, store.clone(), key.clone());

        assert_eq!(sequence.next().unwrap().unwrap(), Value::from(0));
        assert!(!store.contains(&key));
        let rest: Vec<Value> = sequence.map(|r| r.unwrap()).collect();
        assert_eq!(rest, vec![Value::from(1), Value::from(2)]);

        assert_eq!(
            store.get(&key, None).unwrap(),
            Some(Value::list([0, 1, 2]))
        );
    }

    #[test]
    fn test_failed_producer_stores_nothing() {
        let root = tempfile::tempdir().unwrap();
        let store = EntryStore::open(root.path()).unwrap();
        let key = CacheKey::of(&Value::from("seq")).unwrap();

        let producer = vec![Ok(Value::from(0)), Err(anyhow::anyhow!("disk on fire"))].into_iter();
        let results: Vec<_> = CachedSequence::record(producer, store.clone(), key.clone()).collect();

        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(CacheError::Compute(_))));
        assert!(!store.contains(&key));
    }

    #[test]
    fn test_stored_items_rejects_non_sequences() {
        let key = CacheKey::of(&Value::Null).unwrap();
        assert!(stored_items(Value::from(1), &key).is_err());
        assert_eq!(stored_items(Value::list([1]), &key).unwrap(), vec![Value::from(1)]);
    }
}
