use async_trait::async_trait;

use super::ToolError;
use crate::model::DocReference;

/// The documentation-search collaborator. Failures are never fatal to a run.
#[async_trait]
pub trait DocSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<DocReference>, ToolError>;
}

/// Search backend that never returns anything.
pub struct NoSearch;

#[async_trait]
impl DocSearch for NoSearch {
    async fn search(&self, _query: &str) -> Result<Vec<DocReference>, ToolError> {
        Ok(Vec::new())
    }
}

struct IndexEntry {
    keywords: &'static [&'static str],
    title: &'static str,
    url: &'static str,
    relevance: &'static str,
}

const INDEX: &[IndexEntry] = &[
    IndexEntry {
        keywords: &["connection_failure", "timeout"],
        title: "connect(2) - Linux manual page",
        url: "https://man7.org/linux/man-pages/man2/connect.2.html",
        relevance: "high",
    },
    IndexEntry {
        keywords: &["connection_failure"],
        title: "ss(8) - socket statistics",
        url: "https://man7.org/linux/man-pages/man8/ss.8.html",
        relevance: "medium",
    },
    IndexEntry {
        keywords: &["out_of_memory"],
        title: "Out Of Memory Management",
        url: "https://www.kernel.org/doc/gorman/html/understand/understand016.html",
        relevance: "high",
    },
    IndexEntry {
        keywords: &["disk_full"],
        title: "df(1) - report file system space usage",
        url: "https://man7.org/linux/man-pages/man1/df.1.html",
        relevance: "high",
    },
    IndexEntry {
        keywords: &["permission_denied"],
        title: "chmod(1) - change file mode bits",
        url: "https://man7.org/linux/man-pages/man1/chmod.1.html",
        relevance: "medium",
    },
    IndexEntry {
        keywords: &["authentication_failure", "security"],
        title: "sshd(8) - OpenSSH daemon",
        url: "https://man.openbsd.org/sshd.8",
        relevance: "high",
    },
    IndexEntry {
        keywords: &["hdfs_block_problem", "datanode_unavailable", "hdfs"],
        title: "HDFS Users Guide",
        url: "https://hadoop.apache.org/docs/stable/hadoop-project-dist/hadoop-hdfs/HdfsUserGuide.html",
        relevance: "high",
    },
    IndexEntry {
        keywords: &["hdfs_block_problem"],
        title: "HDFS Commands Guide: fsck",
        url: "https://hadoop.apache.org/docs/stable/hadoop-project-dist/hadoop-hdfs/HDFSCommands.html#fsck",
        relevance: "high",
    },
    IndexEntry {
        keywords: &["unhandled_exception", "application"],
        title: "journalctl(1) - query the systemd journal",
        url: "https://man7.org/linux/man-pages/man1/journalctl.1.html",
        relevance: "low",
    },
];

/// Bundled keyword index of reference documentation.
pub struct StaticDocIndex {
    max_results: usize,
}

impl StaticDocIndex {
    pub fn new(max_results: usize) -> Self {
        Self { max_results }
    }

    pub fn lookup(&self, query: &str) -> Vec<DocReference> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_ascii_lowercase())
            .collect();

        INDEX
            .iter()
            .filter(|entry| {
                entry
                    .keywords
                    .iter()
                    .any(|k| terms.iter().any(|t| t == k))
            })
            .take(self.max_results)
            .map(|entry| DocReference {
                title: entry.title.to_string(),
                url: entry.url.to_string(),
                relevance: entry.relevance.to_string(),
            })
            .collect()
    }
}

impl Default for StaticDocIndex {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl DocSearch for StaticDocIndex {
    async fn search(&self, query: &str) -> Result<Vec<DocReference>, ToolError> {
        Ok(self.lookup(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_issue_type() {
        let refs = StaticDocIndex::default().lookup("generic connection_failure");
        let urls: Vec<&str> = refs.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://man7.org/linux/man-pages/man2/connect.2.html",
                "https://man7.org/linux/man-pages/man8/ss.8.html"
            ]
        );
    }

    #[test]
    fn test_lookup_by_category() {
        let refs = StaticDocIndex::default().lookup("HDFS");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].title, "HDFS Users Guide");
    }

    #[test]
    fn test_lookup_respects_limit_and_misses() {
        assert!(StaticDocIndex::default().lookup("generic").is_empty());
        let refs = StaticDocIndex::new(1).lookup("hdfs_block_problem");
        assert_eq!(refs.len(), 1);
    }

    #[tokio::test]
    async fn test_no_search() {
        assert!(NoSearch.search("anything").await.unwrap().is_empty());
    }
}
