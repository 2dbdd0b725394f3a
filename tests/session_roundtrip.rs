//! Multi-party sessions driven through the public processor surface.

use histoseal::adapters::{build_scheme, PlaintextScheme};
use histoseal::domain::config::{KDF_MEMORY_KEY, PASSPHRASE_KEY, SALT_KEY, SCHEME_KEY};
use histoseal::domain::kdf::generate_salt;
use histoseal::domain::{AggregationRequest, GhPairs, ProcessorConfig};
use histoseal::{
    HistogramAggregator, NodePartition, Params, Phase, Processor, SecAggError, SecureProcessor,
};

// Three instances, two features: feature 0 owns bins 0..2, feature 1 bins 2..4.
const CUTS: [u32; 3] = [0, 2, 4];
const SLOTS: [i32; 6] = [0, 2, 1, 3, -1, 2];
const GH: [f64; 6] = [1.0, 10.0, 2.0, 20.0, 3.0, 30.0];

fn aes_params(salt: &str) -> Params {
    [
        (SCHEME_KEY, "aes-gcm"),
        (PASSPHRASE_KEY, "integration-secret"),
        (SALT_KEY, salt),
        (KDF_MEMORY_KEY, "64"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn party(params: &Params) -> SecureProcessor {
    let mut p = SecureProcessor::new();
    p.initialize(true, params.clone()).expect("initialize");
    p.init_aggregation_context(&CUTS, &SLOTS).expect("context");
    p
}

fn responder(params: &Params) -> HistogramAggregator {
    let config = ProcessorConfig::from_params(params).expect("config");
    HistogramAggregator::new(build_scheme(&config).expect("scheme"))
}

/// Label holder broadcasts pairs, feature holder asks for node histograms.
fn run_aggregation(params: &Params, nodes: &NodePartition) -> Vec<f64> {
    let mut label = party(params);
    let mut holder = party(params);
    let mut aggregator = responder(params);

    let broadcast = label.process_gh_pairs(&GH).expect("process gh");
    let received = holder
        .handle_gh_pairs(broadcast.as_bytes())
        .expect("handle gh");
    holder.free_buffer(received);
    label.free_buffer(broadcast);

    let request = holder.process_aggregation(nodes).expect("process aggregation");
    let response = aggregator.respond(request.as_bytes()).expect("respond");
    holder.free_buffer(request);
    let sums = holder.handle_aggregation(&response).expect("handle aggregation");

    assert_eq!(label.buffer_stats().outstanding, 0);
    assert_eq!(holder.buffer_stats().outstanding, 0);
    sums
}

#[test]
fn test_node_major_ordering_plaintext() {
    // Inserted out of order on purpose.
    let mut nodes = NodePartition::new();
    nodes.insert(2, vec![1]);
    nodes.insert(0, vec![0, 2]);

    let sums = run_aggregation(&Params::new(), &nodes);
    assert_eq!(sums.len(), 2 * 2 * 4);
    // Node 0 first: row 0 -> bins 0, 2; row 2 -> bin 2.
    assert_eq!(&sums[..8], &[1.0, 10.0, 0.0, 0.0, 4.0, 40.0, 0.0, 0.0]);
    // Then node 2: row 1 -> bins 1, 3.
    assert_eq!(&sums[8..], &[0.0, 0.0, 2.0, 20.0, 0.0, 0.0, 2.0, 20.0]);
}

#[test]
fn test_node_major_ordering_aes_gcm() {
    let params = aes_params(&generate_salt());
    let mut nodes = NodePartition::new();
    nodes.insert(2, vec![1]);
    nodes.insert(0, vec![0, 2]);

    let plain = run_aggregation(&Params::new(), &nodes);
    let sealed = run_aggregation(&params, &nodes);
    assert_eq!(plain, sealed);
}

#[test]
fn test_concatenated_responses_keep_party_order() {
    let mut holder = party(&Params::new());
    let mut first = responder(&Params::new());
    let mut second = responder(&Params::new());

    let pairs = holder.process_gh_pairs(&GH).expect("process gh");
    holder.free_buffer(pairs);

    let mut nodes = NodePartition::new();
    nodes.insert(0, vec![0]);
    let a = holder.process_aggregation(&nodes).expect("first request");
    nodes.insert(0, vec![1]);
    let b = holder.process_aggregation(&nodes).expect("second request");

    // The second request carries no layout; a fresh responder cannot serve it.
    assert!(matches!(
        second.respond(b.as_bytes()),
        Err(SecAggError::InvalidState(_))
    ));
    second.respond(a.as_bytes()).expect("layout now cached");

    let mut gathered = first.respond(a.as_bytes()).expect("respond a");
    gathered.extend(second.respond(b.as_bytes()).expect("respond b"));

    let sums = holder.handle_aggregation(&gathered).expect("handle");
    assert_eq!(
        sums,
        vec![
            1.0, 10.0, 0.0, 0.0, 1.0, 10.0, 0.0, 0.0, // row 0
            0.0, 0.0, 2.0, 20.0, 0.0, 0.0, 2.0, 20.0, // row 1
        ]
    );
    holder.free_buffer(a);
    holder.free_buffer(b);
}

#[test]
fn test_features_sent_on_first_round_only() {
    let mut p = party(&Params::new());
    let mut nodes = NodePartition::new();
    nodes.insert(0, vec![0, 1, 2]);

    let mut with_layout = Vec::new();
    for _round in 0..3 {
        let pairs = p.process_gh_pairs(&GH).expect("gh");
        p.free_buffer(pairs);
        let request = p.process_aggregation(&nodes).expect("aggregation");
        let decoded = AggregationRequest::from_frame(request.as_bytes()).expect("decode");
        with_layout.push(decoded.layout.is_some());
        p.free_buffer(request);
    }
    assert_eq!(with_layout, vec![true, false, false]);

    // A new session sends the layout again.
    p.shutdown();
    p.initialize(true, Params::new()).expect("initialize");
    p.init_aggregation_context(&CUTS, &SLOTS).expect("context");
    let pairs = p.process_gh_pairs(&GH).expect("gh");
    p.free_buffer(pairs);
    let request = p.process_aggregation(&nodes).expect("aggregation");
    let decoded = AggregationRequest::from_frame(request.as_bytes()).expect("decode");
    assert!(decoded.layout.is_some());
}

#[test]
fn test_histogram_exchange_between_parties() {
    let params = aes_params(&generate_salt());
    let mut parties: Vec<SecureProcessor> = (0..3).map(|_| party(&params)).collect();
    let merger = responder(&params);

    let mut gathered = Vec::new();
    for (i, p) in parties.iter_mut().enumerate() {
        let local = vec![i as f64; 8];
        let encoded = p.process_histograms(&local).expect("process");
        gathered.extend_from_slice(encoded.as_bytes());
        p.free_buffer(encoded);
    }

    let merged = merger.merge_histograms(&gathered).expect("merge");
    for p in &mut parties {
        assert_eq!(p.handle_histograms(&merged).expect("handle"), vec![3.0; 8]);
        assert_eq!(p.buffer_stats().outstanding, 0);
    }
}

#[test]
fn test_inactive_party_relays_gh_pairs() {
    let mut relay = SecureProcessor::new();
    relay.initialize(false, Params::new()).expect("initialize");

    let encoded = relay
        .process_gh_pairs(&[1.0, 2.0, 3.0, 4.0])
        .expect("process");
    let decoded = relay.handle_gh_pairs(encoded.as_bytes()).expect("handle");
    assert_eq!(
        GhPairs::from_frame(decoded.as_bytes())
            .expect("decode")
            .into_inner(),
        vec![1.0, 2.0, 3.0, 4.0]
    );
    relay.free_buffer(encoded);
    relay.free_buffer(decoded);
    assert_eq!(relay.buffer_stats().outstanding, 0);
}

#[test]
fn test_leak_is_visible_not_fatal() {
    let mut p = party(&Params::new());
    let released = p.process_histograms(&[1.0; 8]).expect("process");
    let forgotten = p.process_histograms(&[2.0; 8]).expect("process");
    p.free_buffer(released);

    // Codec keeps working with a buffer outstanding.
    let next = p.process_histograms(&[3.0; 8]).expect("process");
    p.free_buffer(next);

    assert_eq!(p.buffer_stats().outstanding, 1);
    p.free_buffer(forgotten);
    assert_eq!(p.buffer_stats().outstanding, 0);
}

#[test]
fn test_plaintext_scheme_aggregator_rejects_envelopes() {
    let params = aes_params(&generate_salt());
    let mut holder = party(&params);
    let pairs = holder.process_gh_pairs(&GH).expect("gh");
    holder.free_buffer(pairs);

    let mut nodes = NodePartition::new();
    nodes.insert(0, vec![0]);
    let request = holder.process_aggregation(&nodes).expect("request");

    let mut plain = HistogramAggregator::new(Box::new(PlaintextScheme));
    assert!(matches!(
        plain.respond(request.as_bytes()),
        Err(SecAggError::CorruptBuffer(_))
    ));
}

#[test]
fn test_shutdown_returns_to_created() {
    let mut p = party(&Params::new());
    for _ in 0..4 {
        p.shutdown();
    }
    assert_eq!(p.phase(), Phase::Created);
    assert_eq!(p.diagnostics().shutdowns, 1);
    assert_eq!(p.diagnostics().sessions_started, 1);
}
