use cumulo_common::ObjectKey;
use parking_lot::Mutex;

/// Serialized allocator of object keys. Every object ever uploaded takes its
/// key from [KeyCounter::next]; recovery resets the counter with
/// [KeyCounter::replace] so no key is reused after a restart.
#[derive(Debug, Default)]
pub struct KeyCounter {
    key: Mutex<ObjectKey>,
}

impl KeyCounter {
    pub fn new() -> Self { Self::default() }

    /// The key the next upload will get. Peeking does not reserve it; call
    /// [KeyCounter::next] before actually uploading.
    pub fn current(&self) -> ObjectKey { *self.key.lock() }

    /// Take the current key and advance the counter.
    pub fn next(&self) -> ObjectKey {
        let mut key = self.key.lock();
        let tmp = *key;
        *key += 1;
        tmp
    }

    pub fn replace(&self, new_key: ObjectKey) { *self.key.lock() = new_key; }
}
