use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Identity of an imageboard site, e.g. `4chan`.
///
/// Backed by `Arc<str>` so descriptors can be cloned into map keys and
/// spawned tasks without copying the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteDescriptor(Arc<str>);

impl SiteDescriptor {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A board on a site, e.g. `4chan/ck`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoardDescriptor {
    pub site: SiteDescriptor,
    pub code: Arc<str>,
}

impl BoardDescriptor {
    pub fn new(site: SiteDescriptor, code: impl AsRef<str>) -> Self {
        Self {
            site,
            code: Arc::from(code.as_ref()),
        }
    }

    /// Convenience constructor used heavily by tests and the CLI.
    pub fn create(site: &str, code: &str) -> Self {
        Self::new(SiteDescriptor::new(site), code)
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for BoardDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.site, self.code)
    }
}

/// A thread, identified by its board and the number of its original post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadDescriptor {
    pub board: BoardDescriptor,
    pub op_no: u64,
}

impl ThreadDescriptor {
    pub fn new(board: BoardDescriptor, op_no: u64) -> Self {
        Self { board, op_no }
    }

    pub fn create(site: &str, board: &str, op_no: u64) -> Self {
        Self::new(BoardDescriptor::create(site, board), op_no)
    }

    pub fn site(&self) -> &SiteDescriptor {
        &self.board.site
    }
}

impl fmt::Display for ThreadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.board, self.op_no)
    }
}

/// Key for anything a loader can load: a board catalog or a single thread.
///
/// Ordered by (site, board, op number) where catalogs sort as op number 0,
/// so a catalog always precedes the threads of its board. A catalog and a
/// thread numbered 0 on the same board are ordered catalog first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentDescriptor {
    Catalog(BoardDescriptor),
    Thread(ThreadDescriptor),
}

impl ContentDescriptor {
    pub fn board(&self) -> &BoardDescriptor {
        match self {
            ContentDescriptor::Catalog(board) => board,
            ContentDescriptor::Thread(thread) => &thread.board,
        }
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, ContentDescriptor::Thread(_))
    }

    pub fn as_thread(&self) -> Option<&ThreadDescriptor> {
        match self {
            ContentDescriptor::Thread(thread) => Some(thread),
            ContentDescriptor::Catalog(_) => None,
        }
    }

    fn op_no(&self) -> u64 {
        match self {
            ContentDescriptor::Catalog(_) => 0,
            ContentDescriptor::Thread(thread) => thread.op_no,
        }
    }
}

impl Ord for ContentDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.board()
            .cmp(other.board())
            .then_with(|| self.op_no().cmp(&other.op_no()))
            .then_with(|| self.is_thread().cmp(&other.is_thread()))
    }
}

impl PartialOrd for ContentDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<ThreadDescriptor> for ContentDescriptor {
    fn from(thread: ThreadDescriptor) -> Self {
        ContentDescriptor::Thread(thread)
    }
}

impl From<BoardDescriptor> for ContentDescriptor {
    fn from(board: BoardDescriptor) -> Self {
        ContentDescriptor::Catalog(board)
    }
}

impl fmt::Display for ContentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentDescriptor::Catalog(board) => write!(f, "catalog {}", board),
            ContentDescriptor::Thread(thread) => write!(f, "thread {}", thread),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_sorts_before_its_threads() {
        let catalog = ContentDescriptor::Catalog(BoardDescriptor::create("4chan", "g"));
        let thread = ContentDescriptor::Thread(ThreadDescriptor::create("4chan", "g", 1));
        assert!(catalog < thread);
    }

    #[test]
    fn test_ordering_by_site_then_board_then_op() {
        let mut descriptors = vec![
            ContentDescriptor::from(ThreadDescriptor::create("b", "a", 5)),
            ContentDescriptor::from(ThreadDescriptor::create("a", "z", 1)),
            ContentDescriptor::from(ThreadDescriptor::create("a", "a", 9)),
            ContentDescriptor::from(BoardDescriptor::create("a", "a")),
            ContentDescriptor::from(ThreadDescriptor::create("a", "a", 2)),
        ];
        descriptors.sort();

        let rendered: Vec<String> = descriptors.iter().map(|d| d.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "catalog a/a",
                "thread a/a/2",
                "thread a/a/9",
                "thread a/z/1",
                "thread b/a/5",
            ]
        );
    }

    #[test]
    fn test_catalog_and_thread_zero_are_distinct_keys() {
        use std::collections::BTreeSet;

        let catalog = ContentDescriptor::Catalog(BoardDescriptor::create("4chan", "ck"));
        let thread = ContentDescriptor::Thread(ThreadDescriptor::create("4chan", "ck", 0));
        assert_ne!(catalog, thread);
        assert_eq!(catalog.cmp(&thread), Ordering::Less);
        assert_eq!(thread.cmp(&catalog), Ordering::Greater);

        let set: BTreeSet<_> = [thread.clone(), catalog.clone()].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![catalog, thread]);
    }

    #[test]
    fn test_equal_descriptors_hash_equal() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(ThreadDescriptor::create("4chan", "ck", 100));
        assert!(set.contains(&ThreadDescriptor::create("4chan", "ck", 100)));
        assert!(!set.contains(&ThreadDescriptor::create("4chan", "ck", 101)));
    }
}
