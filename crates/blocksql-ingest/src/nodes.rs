//! Redundant node selection

use crate::adapter::LedgerAdapter;
use futures::future::join_all;
use tracing::{info, warn};

/// The node chosen for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedNode {
    pub index: usize,
    pub height: u64,
}

/// Ask every node for its height concurrently and pick the highest.
///
/// Ties go to the lowest configured index. Nodes that fail are logged and
/// left out; `None` when none answered.
pub async fn select_node<A: LedgerAdapter>(nodes: &[A]) -> Option<SelectedNode> {
    let heights = join_all(nodes.iter().map(|node| node.get_height())).await;

    let mut best: Option<SelectedNode> = None;
    for (index, result) in heights.into_iter().enumerate() {
        match result {
            Ok(height) => {
                if best.is_none_or(|b| height > b.height) {
                    best = Some(SelectedNode { index, height });
                }
            },
            Err(e) => {
                warn!(
                    node = %nodes[index].endpoint().address(),
                    error = %e,
                    "Node unreachable, excluded from this pass"
                );
            },
        }
    }

    if let Some(selected) = best {
        info!(
            node = %nodes[selected.index].endpoint().address(),
            height = selected.height,
            "Selected node"
        );
    }
    best
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, Result};
    use crate::model::CanonicalBlock;
    use crate::rpc::{RpcEndpoint, RpcError};
    use async_trait::async_trait;
    use blocksql_common::Asset;

    struct FixedNode {
        endpoint: RpcEndpoint,
        height: Option<u64>,
    }

    impl FixedNode {
        fn new(port: u16, height: Option<u64>) -> Self {
            Self {
                endpoint: RpcEndpoint::new("127.0.0.1", port, "u", "p"),
                height,
            }
        }
    }

    #[async_trait]
    impl LedgerAdapter for FixedNode {
        type Block = CanonicalBlock;

        fn asset(&self) -> Asset {
            Asset::Btc
        }

        fn endpoint(&self) -> &RpcEndpoint {
            &self.endpoint
        }

        async fn get_height(&self) -> Result<u64> {
            self.height.ok_or_else(|| {
                AdapterError::Rpc(RpcError::Status {
                    endpoint: self.endpoint.address(),
                    status: 503,
                })
            })
        }

        async fn get_block_at(&self, height: u64) -> Result<CanonicalBlock> {
            Err(AdapterError::Shape(format!("no block at {height}")))
        }
    }

    #[tokio::test]
    async fn test_highest_node_wins() {
        let nodes = [
            FixedNode::new(1, Some(100)),
            FixedNode::new(2, Some(105)),
            FixedNode::new(3, Some(101)),
        ];
        let selected = select_node(&nodes).await.unwrap();
        assert_eq!(selected, SelectedNode { index: 1, height: 105 });
    }

    #[tokio::test]
    async fn test_tie_goes_to_lowest_index() {
        let nodes = [
            FixedNode::new(1, None),
            FixedNode::new(2, Some(200)),
            FixedNode::new(3, Some(200)),
        ];
        let selected = select_node(&nodes).await.unwrap();
        assert_eq!(selected.index, 1);
    }

    #[tokio::test]
    async fn test_all_nodes_failing() {
        let nodes = [FixedNode::new(1, None), FixedNode::new(2, None)];
        assert!(select_node(&nodes).await.is_none());
    }
}
