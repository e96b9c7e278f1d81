//! Inode tracking for hardlink deduplication.

use dashmap::DashSet;

/// Identity of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeKey {
    /// Inode number.
    pub inode: u64,
    /// Device ID.
    pub device: u64,
}

/// Tracks seen inodes so a multiply-linked file is counted once.
///
/// Shared by all walker tasks of one scan; the first link observed keeps
/// its size and later links are recorded as zero bytes.
#[derive(Debug, Default)]
pub struct InodeTracker {
    seen: DashSet<InodeKey>,
}

impl InodeTracker {
    /// Create a new inode tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an inode. Returns `true` if this is the first time seeing it.
    pub fn track(&self, key: InodeKey) -> bool {
        self.seen.insert(key)
    }

    /// Get the number of unique inodes tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if no inodes have been tracked.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Size to attribute to a file, given its link count.
    #[cfg(unix)]
    pub fn attributed_size(&self, metadata: &std::fs::Metadata) -> u64 {
        use std::os::unix::fs::MetadataExt;

        if metadata.nlink() > 1 {
            let key = InodeKey {
                inode: metadata.ino(),
                device: metadata.dev(),
            };
            if !self.track(key) {
                return 0;
            }
        }
        metadata.len()
    }

    #[cfg(not(unix))]
    pub fn attributed_size(&self, metadata: &std::fs::Metadata) -> u64 {
        metadata.len()
    }
}
