//! Object-store style backends (S3 buckets, HDFS name nodes).
//!
//! The resource layer only needs whole-object reads and writes. Concrete clients
//! are injected through `Backends`; credentials never pass through this crate.

use std::io;
use std::sync::Arc;

pub trait ObjectClient: Send + Sync {
    fn get(&self, container: &str, key: &str) -> io::Result<Vec<u8>>;
    fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> io::Result<()>;
    fn exists(&self, container: &str, key: &str) -> io::Result<bool>;
    fn size(&self, container: &str, key: &str) -> io::Result<u64>;
    fn delete(&self, container: &str, key: &str) -> io::Result<()>;
}

/// Clients available to the resource layer. `None` means the scheme is unavailable.
#[derive(Clone, Default)]
pub struct Backends {
    pub s3: Option<Arc<dyn ObjectClient>>,
    pub hdfs: Option<Arc<dyn ObjectClient>>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("s3", &self.s3.is_some())
            .field("hdfs", &self.hdfs.is_some())
            .finish()
    }
}
