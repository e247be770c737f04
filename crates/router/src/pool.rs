//! Parallel candidate ranking over a shared read-only graph snapshot.

use lifeline_core::config::RoutingConfig;
use lifeline_core::{LifelineError, NoMatchReason, Request};
use lifeline_graph::LocationGraph;
use rayon::prelude::*;
use tracing::info;

use crate::error::RouterError;
use crate::matcher::{
    find_candidates, rank_candidates, Candidate, MatchPolicy, RankedCandidates, SupplyQuery,
};

/// Fixed-size worker pool for route searches.
///
/// Searches only read the graph, so a batch fans out with no locking; the
/// results come back in input order.
pub struct RoutingPool {
    pool: rayon::ThreadPool,
    policy: MatchPolicy,
    workers: usize,
}

impl RoutingPool {
    pub fn new(config: &RoutingConfig) -> Result<Self, RouterError> {
        let workers = config.resolved_worker_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("lifeline-route-{i}"))
            .build()
            .map_err(|e| RouterError::PoolBuild(e.to_string()))?;
        info!("Routing pool started with {} workers", workers);
        Ok(Self {
            pool,
            policy: MatchPolicy::from(config),
            workers,
        })
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Rank candidates for every request against `graph`.
    pub fn rank_batch(
        &self,
        requests: &[Request],
        graph: &LocationGraph,
    ) -> Vec<Result<RankedCandidates, LifelineError>> {
        let policy = &self.policy;
        self.pool.install(|| {
            requests
                .par_iter()
                .map(|request| rank_candidates(request, graph, policy))
                .collect()
        })
    }

    /// Rank candidates for a single request on the pool.
    pub fn rank_one(
        &self,
        request: &Request,
        graph: &LocationGraph,
    ) -> Result<RankedCandidates, LifelineError> {
        self.pool.install(|| rank_candidates(request, graph, &self.policy))
    }

    /// Up to `limit` supply nodes for an ad-hoc query, best first.
    pub fn candidates(
        &self,
        query: SupplyQuery<'_>,
        graph: &LocationGraph,
        limit: usize,
    ) -> Result<Vec<Candidate>, NoMatchReason> {
        self.pool
            .install(|| find_candidates(query, graph, &self.policy, limit))
            .map(|(candidates, _visited)| candidates)
    }
}

impl std::fmt::Debug for RoutingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingPool")
            .field("workers", &self.workers)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lifeline_core::{BloodGroup, NodeKind, RequestInput, Urgency};
    use lifeline_graph::LocationNode;

    fn request(id: &str, group: &str, location: &str) -> Request {
        RequestInput {
            id: Some(id.into()),
            patient_name: "p".into(),
            blood_group: Some(group.into()),
            quantity_units: Some(1),
            urgency: Some(Urgency::Normal),
            location_node_id: location.into(),
            ..Default::default()
        }
        .into_request(Utc::now())
        .unwrap()
    }

    #[test]
    fn batch_results_keep_input_order() {
        let mut g = LocationGraph::new();
        g.add_node(LocationNode::new("site", NodeKind::RequestSite)).unwrap();
        g.add_node(LocationNode::new("bank", NodeKind::BloodBank).with_stock(BloodGroup::BPos, 3))
            .unwrap();
        g.add_edge("site", "bank", 1.0).unwrap();

        let config = RoutingConfig { worker_threads: 2, ..RoutingConfig::default() };
        let pool = RoutingPool::new(&config).unwrap();
        assert_eq!(pool.workers(), 2);

        let requests: Vec<_> = (0..20)
            .map(|i| {
                let group = if i % 2 == 0 { "B+" } else { "A+" };
                request(&format!("r{i:02}"), group, "site")
            })
            .collect();
        let results = pool.rank_batch(&requests, &g);
        assert_eq!(results.len(), 20);
        for (i, result) in results.iter().enumerate() {
            if i % 2 == 0 {
                let ranked = result.as_ref().unwrap();
                assert_eq!(ranked.request_id, format!("r{i:02}"));
                assert_eq!(ranked.candidates[0].node_id, "bank");
            } else {
                assert!(matches!(
                    result,
                    Err(LifelineError::NoMatchFound {
                        reason: NoMatchReason::NoCompatibleStock,
                        ..
                    })
                ));
            }
        }
        assert!(pool.rank_one(&requests[0], &g).is_ok());

        let query = SupplyQuery {
            blood_group: BloodGroup::AbPos,
            quantity_units: 3,
            location_node_id: "site",
        };
        let listed = pool.candidates(query, &g, 3).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].blood_group, BloodGroup::BPos);
    }
}
