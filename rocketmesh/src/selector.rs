use crate::message::MessageQueue;

/// Picks the queue an ordered message goes to.
///
/// Implementations must be pure: the same queue list and key always yield the
/// same index, which is what keeps per-key ordering intact.
pub trait QueueSelector: Send + Sync {
    fn select(&self, queues: &[MessageQueue], key: &str) -> Option<usize>;
}

/// Default selector: stable string hash of the key modulo the queue count.
///
/// The hash matches the one used by the broker's other client libraries, so
/// producers written in different languages agree on the queue for a key.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectByHash;

impl QueueSelector for SelectByHash {
    fn select(&self, queues: &[MessageQueue], key: &str) -> Option<usize> {
        if queues.is_empty() {
            return None;
        }
        let hash = i64::from(string_hash(key));
        let index = (hash % queues.len() as i64).unsigned_abs();
        Some(index as usize)
    }
}

/// Adapts a closure into a [`QueueSelector`]
pub struct SelectByFn<F> {
    select: F,
}

impl<F> SelectByFn<F>
where
    F: Fn(&[MessageQueue], &str) -> Option<usize> + Send + Sync,
{
    pub fn new(select: F) -> Self {
        Self { select }
    }
}

impl<F> QueueSelector for SelectByFn<F>
where
    F: Fn(&[MessageQueue], &str) -> Option<usize> + Send + Sync,
{
    fn select(&self, queues: &[MessageQueue], key: &str) -> Option<usize> {
        (self.select)(queues, key)
    }
}

/// 32-bit polynomial hash over UTF-16 code units (`h = 31 * h + c`)
pub fn string_hash(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}
