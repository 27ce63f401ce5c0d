//! In-memory chunk backend for testing
//!
//! Besides plain storage it can model the failure modes remote stores show in
//! practice: uploads that fail after the object was stored, reads that fail,
//! transports reporting corrupted checksums, and objects that stay invisible
//! to other accounts for a while after upload.

use crate::{ChunkBackend, ChunkStoreError, FetchedObject, Result, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
struct Entry {
    data: Bytes,
    owner: Option<String>,
    /// Reads by other accounts still refused
    hidden_reads: u32,
}

#[derive(Default)]
struct Inner {
    objects: DashMap<String, Entry>,
    accounts: Vec<String>,
    share_lag: u32,
    fail_puts: AtomicU32,
    fail_gets: AtomicU32,
    corrupt_checksums: AtomicBool,
    omit_checksums: AtomicBool,
    puts: AtomicU32,
    gets: AtomicU32,
    attempted_names: Mutex<Vec<String>>,
    read_log: Mutex<Vec<(String, Option<Range<u64>>, Option<String>)>>,
    read_delays: DashMap<String, Duration>,
    completed_reads: Mutex<Vec<String>>,
}

/// An in-memory chunk backend
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create a new empty backend with a single implicit account
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with named accounts; uploads rotate between them, and an
    /// object is refused to other accounts for its first `share_lag` reads
    pub fn with_accounts(accounts: Vec<String>, share_lag: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                accounts,
                share_lag,
                ..Inner::default()
            }),
        }
    }

    /// Make the next `n` uploads fail after storing the object
    pub fn fail_next_puts(&self, n: u32) {
        self.inner.fail_puts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` reads fail
    pub fn fail_next_gets(&self, n: u32) {
        self.inner.fail_gets.store(n, Ordering::SeqCst);
    }

    /// Report wrong whole-object checksums on reads
    pub fn corrupt_reported_checksums(&self, enabled: bool) {
        self.inner.corrupt_checksums.store(enabled, Ordering::SeqCst);
    }

    /// Make every read of `file_id` take `delay` before answering
    pub fn delay_reads(&self, file_id: &str, delay: Duration) {
        self.inner.read_delays.insert(file_id.to_string(), delay);
    }

    /// Stop reporting whole-object checksums on reads
    pub fn omit_reported_checksums(&self, enabled: bool) {
        self.inner.omit_checksums.store(enabled, Ordering::SeqCst);
    }

    /// Number of objects stored
    pub fn len(&self) -> usize {
        self.inner.objects.len()
    }

    /// Check if the backend is empty
    pub fn is_empty(&self) -> bool {
        self.inner.objects.is_empty()
    }

    /// Check if an object exists
    pub fn contains(&self, file_id: &str) -> bool {
        self.inner.objects.contains_key(file_id)
    }

    /// Raw stored bytes of an object
    pub fn object(&self, file_id: &str) -> Option<Bytes> {
        self.inner.objects.get(file_id).map(|e| e.data.clone())
    }

    /// Replace an object's stored bytes
    pub fn tamper(&self, file_id: &str, f: impl FnOnce(&mut Vec<u8>)) {
        if let Some(mut entry) = self.inner.objects.get_mut(file_id) {
            let mut data = entry.data.to_vec();
            f(&mut data);
            entry.data = Bytes::from(data);
        }
    }

    /// Total upload attempts
    pub fn put_count(&self) -> u32 {
        self.inner.puts.load(Ordering::SeqCst)
    }

    /// Total read attempts
    pub fn get_count(&self) -> u32 {
        self.inner.gets.load(Ordering::SeqCst)
    }

    /// Every name an upload was attempted under, in order
    pub fn attempted_names(&self) -> Vec<String> {
        self.inner.attempted_names.lock().clone()
    }

    /// Every read request as `(file_id, range, account)`, in order
    pub fn read_log(&self) -> Vec<(String, Option<Range<u64>>, Option<String>)> {
        self.inner.read_log.lock().clone()
    }

    /// File ids of successful reads, in the order they finished
    pub fn completed_reads(&self) -> Vec<String> {
        self.inner.completed_reads.lock().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChunkBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn accounts(&self) -> Vec<String> {
        self.inner.accounts.clone()
    }

    async fn put_object(&self, name: &str, data: Bytes) -> Result<StoredObject> {
        let attempt = self.inner.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.attempted_names.lock().push(name.to_string());

        if self.inner.objects.contains_key(name) {
            return Err(ChunkStoreError::Backend(format!("object {name} already exists")));
        }

        let owner = match self.inner.accounts.len() {
            0 => None,
            n => Some(self.inner.accounts[attempt as usize % n].clone()),
        };
        let stored = StoredObject {
            file_id: name.to_string(),
            size: data.len() as u64,
            crc32c: Some(strata_crypto::crc32c_bytes(&data)),
            md5: Some(Md5::digest(&data).into()),
            account: owner.clone(),
        };
        self.inner.objects.insert(
            name.to_string(),
            Entry {
                data,
                owner,
                hidden_reads: self.inner.share_lag,
            },
        );

        if Self::take_failure(&self.inner.fail_puts) {
            return Err(ChunkStoreError::Backend("connection reset during upload".to_string()));
        }
        Ok(stored)
    }

    async fn get_object(
        &self,
        file_id: &str,
        range: Option<Range<u64>>,
        account: Option<&str>,
    ) -> Result<FetchedObject> {
        self.inner.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.read_log.lock().push((
            file_id.to_string(),
            range.clone(),
            account.map(str::to_string),
        ));

        let delay = self.inner.read_delays.get(file_id).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if Self::take_failure(&self.inner.fail_gets) {
            return Err(ChunkStoreError::Backend("service unavailable".to_string()));
        }

        let mut entry = self
            .inner
            .objects
            .get_mut(file_id)
            .ok_or_else(|| ChunkStoreError::NotFound(file_id.to_string()))?;

        if entry.owner.is_some() && entry.owner.as_deref() != account && entry.hidden_reads > 0 {
            entry.hidden_reads -= 1;
            return Err(ChunkStoreError::NotFound(file_id.to_string()));
        }

        let len = entry.data.len() as u64;
        let data = match range {
            Some(r) if r.start > r.end || r.end > len => {
                return Err(ChunkStoreError::Backend(format!(
                    "range {}..{} outside object of {} bytes",
                    r.start, r.end, len
                )))
            }
            Some(r) => entry.data.slice(r.start as usize..r.end as usize),
            None => entry.data.clone(),
        };

        let object_crc32c = if self.inner.omit_checksums.load(Ordering::SeqCst) {
            None
        } else {
            let mut crc = strata_crypto::crc32c_bytes(&entry.data);
            if self.inner.corrupt_checksums.load(Ordering::SeqCst) {
                crc[0] ^= 0xFF;
            }
            Some(crc)
        };
        drop(entry);
        self.inner.completed_reads.lock().push(file_id.to_string());
        Ok(FetchedObject {
            data,
            object_crc32c,
        })
    }

    async fn delete_object(&self, file_id: &str) -> Result<()> {
        self.inner.objects.remove(file_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        let stored = backend.put_object("a", Bytes::from_static(b"hello world")).await.unwrap();
        assert_eq!(stored.size, 11);
        assert_eq!(stored.crc32c, Some(strata_crypto::crc32c_bytes(b"hello world")));
        assert!(backend.contains("a"));

        let whole = backend.get_object("a", None, None).await.unwrap();
        assert_eq!(whole.data, "hello world");
        let part = backend.get_object("a", Some(6..11), None).await.unwrap();
        assert_eq!(part.data, "world");

        backend.delete_object("a").await.unwrap();
        backend.delete_object("a").await.unwrap();
        assert!(backend.is_empty());
        assert!(matches!(
            backend.get_object("a", None, None).await,
            Err(ChunkStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_put_still_stores() {
        let backend = MemoryBackend::new();
        backend.fail_next_puts(1);
        assert!(backend.put_object("x", Bytes::from_static(b"1")).await.is_err());
        assert!(backend.contains("x"));
        assert!(backend.put_object("x", Bytes::from_static(b"1")).await.is_err());
        assert!(backend.put_object("y", Bytes::from_static(b"1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_share_lag() {
        let backend =
            MemoryBackend::with_accounts(vec!["alice".to_string(), "bob".to_string()], 2);
        let stored = backend.put_object("o", Bytes::from_static(b"data")).await.unwrap();
        assert_eq!(stored.account.as_deref(), Some("alice"));

        assert!(backend.get_object("o", None, Some("bob")).await.is_err());
        assert!(backend.get_object("o", None, Some("alice")).await.is_ok());
        assert!(backend.get_object("o", None, Some("bob")).await.is_err());
        assert!(backend.get_object("o", None, Some("bob")).await.is_ok());
    }

    #[tokio::test]
    async fn test_omit_checksums() {
        let backend = MemoryBackend::new();
        backend.put_object("a", Bytes::from_static(b"abc")).await.unwrap();
        backend.omit_reported_checksums(true);
        let fetched = backend.get_object("a", None, None).await.unwrap();
        assert_eq!(fetched.object_crc32c, None);
    }

    #[tokio::test]
    async fn test_bad_range_rejected() {
        let backend = MemoryBackend::new();
        backend.put_object("a", Bytes::from_static(b"abc")).await.unwrap();
        assert!(backend.get_object("a", Some(2..9), None).await.is_err());
    }
}
