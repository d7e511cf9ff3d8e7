//! The weighted service-call graph: nodes, per-node metrics, external-rate
//! estimators, and the back-propagation of arrival rates through the graph.

use std::collections::{BTreeMap, HashMap};

use crate::model::Span;
use crate::queue::metric::QueueMetric;
use crate::queue::rate_estimator::RateEstimator;

/// Online queueing-network approximation built from observed spans.
///
/// `nodes` is a `BTreeMap` rather than a `HashMap` so that lexicographic
/// iteration order (required by [`QueueingNetwork::to_dot`]) falls out of the
/// container instead of a separate sort at render time.
#[derive(Debug, Default)]
pub struct QueueingNetwork {
    nodes: BTreeMap<String, QueueMetric>,
    incoming_rates: HashMap<String, RateEstimator>,
    /// `edges[destination][source] = count`, mirroring how the back-propagation
    /// algorithm walks the graph: "who called me, and how often".
    edges: HashMap<String, HashMap<String, u64>>,
}

impl QueueingNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: inserts a zeroed metric and an empty edge entry if absent.
    pub fn add_node(&mut self, name: &str) {
        if !self.edges.contains_key(name) {
            self.edges.insert(name.to_string(), HashMap::new());
            self.nodes.insert(name.to_string(), QueueMetric::new());
        }
    }

    /// A request that entered the mesh at `span`'s service (its parent span,
    /// if any, belongs to an external/unobserved caller).
    pub fn add_external_request(&mut self, span: &Span) {
        self.add_node(&span.service_name);
        self.nodes
            .get_mut(&span.service_name)
            .expect("add_node just inserted this entry")
            .record(span.duration);

        self.incoming_rates
            .entry(span.service_name.clone())
            .or_default()
            .record_arrival();
    }

    /// A request caused by `parent` calling into `child`. Same-service calls
    /// are dropped without touching the edge set or inserting the parent node.
    pub fn add_internal_request(&mut self, parent: &Span, child: &Span) {
        self.add_node(&child.service_name);
        self.nodes
            .get_mut(&child.service_name)
            .expect("add_node just inserted this entry")
            .record(child.duration);

        if parent.service_name == child.service_name {
            return;
        }

        self.add_node(&parent.service_name);
        *self
            .edges
            .get_mut(&child.service_name)
            .expect("add_node just inserted this entry")
            .entry(parent.service_name.clone())
            .or_insert(0) += 1;
    }

    pub fn metric(&self, service: &str) -> Option<&QueueMetric> {
        self.nodes.get(service)
    }

    /// Applies the α-blend to every ingress `RateEstimator` for one tick.
    pub fn update_estimates(&mut self, interval_secs: f64) {
        for estimator in self.incoming_rates.values_mut() {
            estimator.update(interval_secs);
        }
    }

    /// Total requests ever observed entering each node: root arrivals plus
    /// every edge's contribution from upstream callers.
    fn incoming_requests(&self) -> HashMap<String, u64> {
        let mut totals: HashMap<String, u64> = HashMap::new();
        for (service, estimator) in &self.incoming_rates {
            *totals.entry(service.clone()).or_insert(0) += estimator.total_requests();
        }
        for (dest, parents) in &self.edges {
            for weight in parents.values() {
                *totals.entry(dest.clone()).or_insert(0) += weight;
            }
        }
        totals
    }

    /// Memoized back-propagation of `R[v] = estimate[v] + Σ (weight/in_count[u]) · R[u]`.
    ///
    /// Cycle-breaking policy: `memo` is seeded with `0.0` for `node` before
    /// recursing into its upstream contributors, so a re-entrant call made
    /// while `node` is still being computed observes `0.0` rather than
    /// recursing without bound.
    fn incoming_rate(
        &self,
        node: &str,
        requests: &HashMap<String, u64>,
        memo: &mut HashMap<String, f64>,
    ) -> f64 {
        if let Some(rate) = memo.get(node) {
            return *rate;
        }
        memo.insert(node.to_string(), 0.0);

        let mut rate = self
            .incoming_rates
            .get(node)
            .map(|e| e.estimate)
            .unwrap_or(0.0);

        if let Some(parents) = self.edges.get(node) {
            for (from, weight) in parents {
                let in_count = requests.get(from).copied().unwrap_or(0);
                let prob = *weight as f64 / in_count as f64;
                rate += prob * self.incoming_rate(from, requests, memo);
            }
        }

        memo.insert(node.to_string(), rate);
        rate
    }

    /// The effective incoming rate of every node, root arrivals propagated
    /// through the call graph.
    pub fn incoming_rates(&self) -> HashMap<String, f64> {
        let requests = self.incoming_requests();
        let mut memo = HashMap::with_capacity(self.nodes.len());
        for node in self.nodes.keys() {
            self.incoming_rate(node, &requests, &mut memo);
        }
        memo
    }

    /// Deterministic DOT rendering of the current snapshot.
    pub fn to_dot(&self) -> String {
        if self.nodes.is_empty() {
            return "digraph {}".to_string();
        }

        let names: Vec<&String> = self.nodes.keys().collect();
        let mut out = String::from("digraph {");
        out.push_str("\n    ingress [label=\"ingress\"];\n");

        for (i, name) in names.iter().enumerate() {
            let mu = self.nodes[*name].service_rate();
            out.push_str(&format!(
                "    {i} [shape=record,label=\"{{{name}|mu = {mu:.2} req/s}}\"];\n"
            ));
        }

        for (i, name) in names.iter().enumerate() {
            if let Some(estimator) = self.incoming_rates.get(*name) {
                out.push_str(&format!(
                    "    ingress -> {i} [label=\"{:.2} req/s\"];\n",
                    estimator.estimate
                ));
            }
        }

        let in_count = self.incoming_requests();
        for (i, from) in names.iter().enumerate() {
            for (j, to) in names.iter().enumerate() {
                let Some(weight) = self.edges.get(*to).and_then(|parents| parents.get(*from)) else {
                    continue;
                };
                let coef = *weight as f64 / in_count[*from] as f64;
                out.push_str(&format!("    {i} -> {j} [label=\"{coef:.2}\"];\n"));
            }
        }

        out.push('}');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace: &str, id: &str, parent: &str, service: &str, duration: u64) -> Span {
        Span {
            trace_id: trace.to_string(),
            span_id: id.to_string(),
            parent_span_id: parent.to_string(),
            service_name: service.to_string(),
            start_time: 0,
            duration,
        }
    }

    #[test]
    fn empty_network_renders_digraph_braces() {
        assert_eq!(QueueingNetwork::new().to_dot(), "digraph {}");
    }

    #[test]
    fn add_node_is_idempotent() {
        let mut net = QueueingNetwork::new();
        net.add_node("a");
        net.add_node("a");
        assert_eq!(net.nodes.len(), 1);
    }

    #[test]
    fn single_root_span_one_tick() {
        let mut net = QueueingNetwork::new();
        let root = span("t1", "s1", "", "service1", 100);
        net.add_external_request(&root);
        net.update_estimates(0.05);

        assert!((net.metric("service1").unwrap().service_rate() - 10_000_000.0).abs() < 1e-6);
        let dot = net.to_dot();
        assert!(dot.contains("ingress -> 0 [label=\"16.00 req/s\"]"));
    }

    #[test]
    fn root_plus_child_produces_edge_and_coefficient() {
        let mut net = QueueingNetwork::new();
        let root = span("t1", "root", "", "service1", 100);
        let child = span("t1", "child", "root", "service2", 50);
        net.add_external_request(&root);
        net.add_internal_request(&root, &child);
        net.update_estimates(0.05);

        let dot = net.to_dot();
        assert!(dot.contains("{service1|mu = 10000000.00 req/s}"));
        assert!(dot.contains("{service2|mu = 20000000.00 req/s}"));
        assert!(dot.contains("ingress -> 0 [label=\"16.00 req/s\"]"));
        assert!(dot.contains("0 -> 1 [label=\"1.00\"]"));
    }

    #[test]
    fn self_call_suppressed() {
        let mut net = QueueingNetwork::new();
        let root = span("t1", "root", "", "service1", 100);
        let child = span("t1", "child", "root", "service1", 50);
        net.add_external_request(&root);
        net.add_internal_request(&root, &child);

        assert_eq!(net.edges.get("service1").unwrap().len(), 0);
    }

    #[test]
    fn incoming_rates_single_path() {
        let mut net = QueueingNetwork::new();
        for n in ["node1", "node2", "node3", "node4"] {
            net.add_node(n);
        }
        net.nodes.get_mut("node1").unwrap().record(26_000_000);
        for _ in 1..100 {
            net.nodes.get_mut("node1").unwrap().record(26_000_000);
        }
        net.incoming_rates.insert(
            "node1".to_string(),
            RateEstimator {
                ..Default::default()
            },
        );
        for _ in 0..100 {
            net.incoming_rates.get_mut("node1").unwrap().record_arrival();
        }
        *net.edges
            .get_mut("node2")
            .unwrap()
            .entry("node1".to_string())
            .or_insert(0) = 100;
        *net.edges
            .get_mut("node3")
            .unwrap()
            .entry("node2".to_string())
            .or_insert(0) = 100;
        *net.edges
            .get_mut("node4")
            .unwrap()
            .entry("node3".to_string())
            .or_insert(0) = 100;
        net.incoming_rates.get_mut("node1").unwrap().update(1.0);
        // force a known estimate for determinism independent of the alpha blend
        net.incoming_rates.get_mut("node1").unwrap().estimate = 100.0;

        let rates = net.incoming_rates();
        for node in ["node1", "node2", "node3", "node4"] {
            assert!((rates[node] - 100.0).abs() < 1e-9, "{node}: {}", rates[node]);
        }
    }

    #[test]
    fn cyclic_edges_do_not_recurse_unbounded() {
        let mut net = QueueingNetwork::new();
        net.add_node("a");
        net.add_node("b");
        *net.edges.get_mut("a").unwrap().entry("b".to_string()).or_insert(0) = 5;
        *net.edges.get_mut("b").unwrap().entry("a".to_string()).or_insert(0) = 5;
        net.incoming_rates
            .insert("a".to_string(), RateEstimator::default());
        net.incoming_rates.get_mut("a").unwrap().estimate = 10.0;
        for _ in 0..5 {
            net.incoming_rates.get_mut("a").unwrap().record_arrival();
        }
        // The recursion must terminate; the exact value encodes the
        // documented cycle-breaking policy (zero-seeded memo).
        let rates = net.incoming_rates();
        assert!(rates.contains_key("a"));
        assert!(rates.contains_key("b"));
        assert!(rates["a"].is_finite());
        assert!(rates["b"].is_finite());
    }

    fn large_ecommerce_network(extra_ingress: &[(&str, f64, u64)]) -> QueueingNetwork {
        let mut net = QueueingNetwork::new();
        let metrics: &[(&str, u64, u64)] = &[
            ("inventory-db", 52_889_178, 29),
            ("cart", 38_462_343, 10),
            ("checkout", 1_058_472_501, 6),
            ("payment", 36_145_940, 2),
            ("shipping", 12_603_945, 2),
            ("inventory", 238_685_313, 16),
            ("products-api", 8_248_710_225, 37),
            ("account", 46_039_811, 13),
            ("account-db", 41_321_908, 16),
            ("cart-redis", 5_722_449, 11),
            ("notification", 1_884_029, 5),
        ];
        for (name, duration_sum, request_count) in metrics {
            net.add_node(name);
            net.nodes
                .insert(name.to_string(), QueueMetric::from_raw(*duration_sum, *request_count));
        }

        let edges: &[(&str, &str, u64)] = &[
            ("account", "payment", 1),
            ("account", "products-api", 11),
            ("account", "shipping", 1),
            ("account-db", "account", 16),
            ("cart", "checkout", 2),
            ("cart", "products-api", 4),
            ("cart-redis", "cart", 10),
            ("checkout", "products-api", 1),
            ("inventory", "cart", 4),
            ("inventory", "checkout", 1),
            ("inventory", "products-api", 6),
            ("inventory-db", "inventory", 25),
            ("notification", "inventory", 5),
            ("payment", "checkout", 1),
            ("shipping", "checkout", 1),
        ];
        for (dest, src, weight) in edges {
            net.edges
                .get_mut(*dest)
                .unwrap()
                .insert(src.to_string(), *weight);
        }

        for (service, estimate, total_requests) in extra_ingress {
            let mut estimator = RateEstimator::default();
            for _ in 0..*total_requests {
                estimator.record_arrival();
            }
            estimator.update(1.0); // resets latest_requests, leaves total_requests
            estimator.estimate = *estimate;
            net.incoming_rates.insert(service.to_string(), estimator);
        }

        net
    }

    #[test]
    fn large_network_dot_matches_reference_rendering() {
        use pretty_assertions::assert_eq;

        let net = large_ecommerce_network(&[("products-api", 3.0, 15)]);

        let expected = "digraph {\n    ingress [label=\"ingress\"];\n    0 [shape=record,label=\"{account|mu = 282.36 req/s}\"];\n    1 [shape=record,label=\"{account-db|mu = 387.20 req/s}\"];\n    2 [shape=record,label=\"{cart|mu = 259.99 req/s}\"];\n    3 [shape=record,label=\"{cart-redis|mu = 1922.25 req/s}\"];\n    4 [shape=record,label=\"{checkout|mu = 5.67 req/s}\"];\n    5 [shape=record,label=\"{inventory|mu = 67.03 req/s}\"];\n    6 [shape=record,label=\"{inventory-db|mu = 548.32 req/s}\"];\n    7 [shape=record,label=\"{notification|mu = 2653.89 req/s}\"];\n    8 [shape=record,label=\"{payment|mu = 55.33 req/s}\"];\n    9 [shape=record,label=\"{products-api|mu = 4.49 req/s}\"];\n    10 [shape=record,label=\"{shipping|mu = 158.68 req/s}\"];\n    ingress -> 9 [label=\"3.00 req/s\"];\n    0 -> 1 [label=\"1.23\"];\n    2 -> 3 [label=\"1.67\"];\n    2 -> 5 [label=\"0.67\"];\n    4 -> 2 [label=\"2.00\"];\n    4 -> 5 [label=\"1.00\"];\n    4 -> 8 [label=\"1.00\"];\n    4 -> 10 [label=\"1.00\"];\n    5 -> 6 [label=\"2.27\"];\n    5 -> 7 [label=\"0.45\"];\n    8 -> 0 [label=\"1.00\"];\n    9 -> 0 [label=\"0.73\"];\n    9 -> 2 [label=\"0.27\"];\n    9 -> 4 [label=\"0.07\"];\n    9 -> 5 [label=\"0.40\"];\n    10 -> 0 [label=\"1.00\"];\n}";

        assert_eq!(net.to_dot(), expected);
    }

    #[test]
    fn multiple_ingress_services_emit_ingress_edges_in_node_order() {
        use pretty_assertions::assert_eq;

        let mut net = large_ecommerce_network(&[
            ("products-api", 3.0, 15),
            ("account", 2.0, 10),
            ("inventory", 1.0, 5),
        ]);
        // this variant's fixture also perturbs three metrics relative to the
        // single-ingress case, matching the upstream reference test exactly
        net.nodes.insert(
            "inventory".to_string(),
            QueueMetric::from_raw(438_685_313, 26),
        );
        net.nodes
            .insert("account".to_string(), QueueMetric::from_raw(46_739_811, 18));

        let expected = "digraph {\n    ingress [label=\"ingress\"];\n    0 [shape=record,label=\"{account|mu = 385.11 req/s}\"];\n    1 [shape=record,label=\"{account-db|mu = 387.20 req/s}\"];\n    2 [shape=record,label=\"{cart|mu = 259.99 req/s}\"];\n    3 [shape=record,label=\"{cart-redis|mu = 1922.25 req/s}\"];\n    4 [shape=record,label=\"{checkout|mu = 5.67 req/s}\"];\n    5 [shape=record,label=\"{inventory|mu = 59.27 req/s}\"];\n    6 [shape=record,label=\"{inventory-db|mu = 548.32 req/s}\"];\n    7 [shape=record,label=\"{notification|mu = 2653.89 req/s}\"];\n    8 [shape=record,label=\"{payment|mu = 55.33 req/s}\"];\n    9 [shape=record,label=\"{products-api|mu = 4.49 req/s}\"];\n    10 [shape=record,label=\"{shipping|mu = 158.68 req/s}\"];\n    ingress -> 0 [label=\"2.00 req/s\"];\n    ingress -> 5 [label=\"1.00 req/s\"];\n    ingress -> 9 [label=\"3.00 req/s\"];\n    0 -> 1 [label=\"0.70\"];\n    2 -> 3 [label=\"1.67\"];\n    2 -> 5 [label=\"0.67\"];\n    4 -> 2 [label=\"2.00\"];\n    4 -> 5 [label=\"1.00\"];\n    4 -> 8 [label=\"1.00\"];\n    4 -> 10 [label=\"1.00\"];\n    5 -> 6 [label=\"1.56\"];\n    5 -> 7 [label=\"0.31\"];\n    8 -> 0 [label=\"1.00\"];\n    9 -> 0 [label=\"0.73\"];\n    9 -> 2 [label=\"0.27\"];\n    9 -> 4 [label=\"0.07\"];\n    9 -> 5 [label=\"0.40\"];\n    10 -> 0 [label=\"1.00\"];\n}";

        assert_eq!(net.to_dot(), expected);
    }

    #[test]
    fn sorted_node_names_regardless_of_insertion_order() {
        let mut net = QueueingNetwork::new();
        for node in ["node3", "node2", "node1"] {
            net.add_node(node);
        }
        let expected = "digraph {\n    ingress [label=\"ingress\"];\n    0 [shape=record,label=\"{node1|mu = 0.00 req/s}\"];\n    1 [shape=record,label=\"{node2|mu = 0.00 req/s}\"];\n    2 [shape=record,label=\"{node3|mu = 0.00 req/s}\"];\n}";
        assert_eq!(net.to_dot(), expected);
    }
}
