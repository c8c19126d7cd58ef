use std::collections::{HashMap, HashSet};
use serde::{Serialize, Deserialize};

use crate::crawler::task::CrawlNode;

/// Nested view of a crawl, rooted at the start URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTreeNode {
    pub url: String,
    pub status: Option<u16>,
    pub depth: u32,
    pub error: Option<String>,
    pub children: Vec<CrawlTreeNode>,
}

impl From<&CrawlNode> for CrawlTreeNode {
    fn from(node: &CrawlNode) -> Self {
        Self {
            url: node.url.clone(),
            status: node.status,
            depth: node.depth,
            error: node.error.clone(),
            children: Vec::new(),
        }
    }
}

/// Rebuild the crawl tree from parent links.
///
/// Nodes whose parent is missing from `nodes` are left out.
pub fn build_crawl_tree(nodes: &[CrawlNode]) -> Option<CrawlTreeNode> {
    let root = nodes.iter().find(|node| node.parent_url.is_none())?;

    let mut children: HashMap<&str, Vec<&CrawlNode>> = HashMap::new();
    for node in nodes {
        if let Some(parent) = node.parent_url.as_deref() {
            children.entry(parent).or_default().push(node);
        }
    }

    let mut attached = HashSet::new();
    Some(attach(root, &children, &mut attached))
}

fn attach<'a>(
    node: &'a CrawlNode,
    children: &HashMap<&'a str, Vec<&'a CrawlNode>>,
    attached: &mut HashSet<&'a str>,
) -> CrawlTreeNode {
    attached.insert(node.url.as_str());
    let mut tree = CrawlTreeNode::from(node);

    if let Some(kids) = children.get(node.url.as_str()) {
        for kid in kids {
            // Guards against cycles in hand-built input
            if attached.contains(kid.url.as_str()) {
                continue;
            }
            tree.children.push(attach(kid, children, attached));
        }
    }

    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::task::CrawlQueueEntry;

    #[test]
    fn test_build_crawl_tree() {
        let root = CrawlQueueEntry::seed("https://example.com/");
        let a = CrawlQueueEntry::child("https://example.com/a", &root);
        let b = CrawlQueueEntry::child("https://example.com/b", &root);
        let a1 = CrawlQueueEntry::child("https://example.com/a/1", &a);

        let nodes = vec![
            CrawlNode::visited(&root, Some(200)),
            CrawlNode::visited(&a, Some(200)),
            CrawlNode::failed(&b, "timeout"),
            CrawlNode::visited(&a1, Some(404)),
        ];

        let tree = build_crawl_tree(&nodes).unwrap();
        assert_eq!(tree.url, "https://example.com/");
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].children[0].url, "https://example.com/a/1");
        assert_eq!(tree.children[0].children[0].status, Some(404));
        assert_eq!(tree.children[1].error.as_deref(), Some("timeout"));
        assert!(tree.children[1].children.is_empty());
    }

    #[test]
    fn test_empty_crawl_has_no_tree() {
        assert!(build_crawl_tree(&[]).is_none());
    }
}
