//! Parity test runner with HTML/JSON report generation.
//!
//! Runs a battery of targeted checks against each netcode layer (wire
//! codec, transport/reliability, clock sync, connection FSM, state/delta
//! codec, prediction, interpolation) and emits a report in the same format
//! `engine_shared::test_report` always has.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use engine_client::interp::{sample_position, InterpolationBuffer, SampleMode};
use engine_client::predict::Predictor;
use engine_shared::conn_fsm::{ConnEvent, ConnectionFsm};
use engine_shared::config::EngineConfig;
use engine_shared::ecs::EntityId;
use engine_shared::math::Vec3;
use engine_shared::diagnostics::Diagnostics;
use engine_shared::state::{self, ApplyDeltaError, EntityState, EntityTable};
use engine_shared::test_report::{ReportBuilder, TestPriority, TestResult};
use engine_shared::transport::{ReceiveOutcome, Transport};
use engine_shared::wire::{self, DecodeError, Header, Message, ReliablePayload, PROTOCOL_VERSION};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let output_dir = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("test-reports"));

    println!("Netcode Parity Test Runner");
    println!("===========================\n");

    std::fs::create_dir_all(&output_dir).expect("Failed to create output directory");

    let mut builder = ReportBuilder::new("Netcode Core Parity Tests")
        .subtitle("Validation suite for the tick-based client/server netcode core")
        .git_info(
            std::env::var("GIT_COMMIT").ok().as_deref().or(Some("development")),
            std::env::var("GIT_BRANCH").ok().as_deref().or(Some("main")),
        );

    if let Ok(build) = std::env::var("BUILD_NUMBER") {
        builder = builder.build_number(&build);
    }

    println!("Running wire codec tests...");
    builder = run_wire_tests(builder);

    println!("Running transport/reliability tests...");
    builder = run_transport_tests(builder);

    println!("Running connection FSM tests...");
    builder = run_fsm_tests(builder);

    println!("Running state/delta codec tests...");
    builder = run_state_tests(builder);

    println!("Running prediction tests...");
    builder = run_prediction_tests(builder);

    println!("Running interpolation tests...");
    builder = run_interpolation_tests(builder);

    println!("Running diagnostics counter tests...");
    builder = run_diagnostics_tests(builder);

    let report = builder.build();
    let stats = report.overall_stats();

    println!("\n===========================");
    println!("Test Results Summary");
    println!("===========================");
    println!("Total:   {}", stats.total);
    println!("Passed:  {}", stats.passed);
    println!("Failed:  {}", stats.failed);
    println!("Skipped: {}", stats.skipped);
    println!("Pass rate: {:.1}%", stats.pass_rate());
    println!("Duration: {:.2}s", stats.total_duration.as_secs_f64());

    let html_path = output_dir.join("parity-tests.html");
    let json_path = output_dir.join("parity-tests.json");

    report.save_html(&html_path).expect("Failed to save HTML report");
    report.save_json(&json_path).expect("Failed to save JSON report");

    println!("\nReports saved to:");
    println!("   HTML: {}", html_path.display());
    println!("   JSON: {}", json_path.display());

    if stats.failed > 0 {
        std::process::exit(1);
    }
}

fn run_test<F>(id: &str, name: &str, category: &str, description: &str, f: F) -> TestResult
where
    F: FnOnce() -> Result<(), String>,
{
    let start = Instant::now();
    let result = f();
    let duration = start.elapsed();

    let mut test = TestResult::new(id, name, category).with_description(description);
    match result {
        Ok(()) => test = test.pass(duration),
        Err(e) => test = test.fail(duration, &e),
    }
    test
}

fn blank_header() -> Header {
    Header { version: PROTOCOL_VERSION, flags: 0, peer_seq: 0, peer_ack: 0, ack_bits: 0 }
}

fn run_wire_tests(mut builder: ReportBuilder) -> ReportBuilder {
    const CATEGORY: &str = "Wire Codec";

    builder = builder.add_test(
        run_test(
            "WIRE-001",
            "Header and Message Roundtrip",
            CATEGORY,
            "A handshake datagram decodes back to the header and message it was encoded from",
            || {
                let messages = vec![Message::Handshake { client_capability_flags: 3 }];
                let bytes = wire::encode_datagram(&blank_header(), &messages).map_err(|e| e.to_string())?;
                let (header, decoded) = wire::decode_datagram(&bytes).map_err(|e| e.to_string())?;
                if header != blank_header() {
                    return Err("header changed across the wire".to_string());
                }
                if decoded != messages {
                    return Err("message list changed across the wire".to_string());
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder = builder.add_test(
        run_test(
            "WIRE-002",
            "Oversize Payload Rejected",
            CATEGORY,
            "Encoding refuses a payload that would exceed the datagram cap",
            || {
                let big = Message::ScriptRpc { reliable_id: 1, channel: 0, payload: vec![0u8; wire::MAX_PAYLOAD_BYTES + 10] };
                match wire::encode_datagram(&blank_header(), &[big]) {
                    Err(DecodeError::TooLarge) => Ok(()),
                    other => Err(format!("expected TooLarge, got {other:?}")),
                }
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder = builder.add_test(
        run_test(
            "WIRE-003",
            "Bad Magic Rejected",
            CATEGORY,
            "A datagram with a corrupted magic number is classified, not panicked on",
            || {
                let bytes = wire::encode_datagram(&blank_header(), &[Message::ClockPing { t_send: 1 }]).map_err(|e| e.to_string())?;
                let mut corrupted = bytes;
                corrupted[0] = 0xFF;
                corrupted[1] = 0xFF;
                match wire::decode_datagram(&corrupted) {
                    Err(DecodeError::BadMagic(_)) => Ok(()),
                    other => Err(format!("expected BadMagic, got {other:?}")),
                }
            },
        )
        .with_priority(TestPriority::High),
    );

    builder
}

fn run_transport_tests(mut builder: ReportBuilder) -> ReportBuilder {
    const CATEGORY: &str = "Transport";

    builder = builder.add_test(
        run_test(
            "XPORT-001",
            "Duplicate Datagram Detected",
            CATEGORY,
            "The same peer_seq arriving twice is flagged as a duplicate",
            || {
                let mut transport = Transport::new();
                let now = Instant::now();
                let header = transport.build_header(PROTOCOL_VERSION, 0, &[], now);
                if transport.on_receive_header(&header) != ReceiveOutcome::Accepted {
                    return Err("first delivery should be accepted".to_string());
                }
                if transport.on_receive_header(&header) != ReceiveOutcome::Duplicate {
                    return Err("repeated peer_seq should be a duplicate".to_string());
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder = builder.add_test(
        run_test(
            "XPORT-002",
            "Unacked Reliable Message Retransmits",
            CATEGORY,
            "A reliable message not yet acked is retransmitted once its timeout elapses",
            || {
                let mut transport = Transport::new();
                let now = Instant::now();
                transport.queue_reliable(Message::Disconnect { reason: wire::DisconnectReason::ClientQuit }, now);
                let immediate = transport.drain_reliable_for_send(now, Duration::from_millis(50));
                if immediate.is_empty() {
                    return Err("first send should include the queued message".to_string());
                }
                let too_soon = transport.drain_reliable_for_send(now + Duration::from_millis(10), Duration::from_millis(50));
                if !too_soon.is_empty() {
                    return Err("should not retransmit before the timeout".to_string());
                }
                let after_timeout = transport.drain_reliable_for_send(now + Duration::from_millis(300), Duration::from_millis(50));
                if after_timeout.is_empty() {
                    return Err("should retransmit once the timeout has passed".to_string());
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder = builder.add_test(
        run_test(
            "XPORT-003",
            "Reliable Messages Reordered Into Sequence",
            CATEGORY,
            "Reliable messages arriving out of order are delivered in id order",
            || {
                let mut transport = Transport::new();
                let chat = |id: u32, text: &str| Message::Reliable {
                    reliable_id: id,
                    payload: ReliablePayload::Chat { from: engine_shared::net::ClientId(1), text: text.to_string() },
                };
                let (_, ready) = transport.receive_reliable(1, chat(1, "second"));
                if !ready.is_empty() {
                    return Err("id 1 should wait for id 0".to_string());
                }
                let (_, ready) = transport.receive_reliable(0, chat(0, "first"));
                if ready.len() != 2 {
                    return Err(format!("expected both messages released in order, got {}", ready.len()));
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder
}

fn run_fsm_tests(mut builder: ReportBuilder) -> ReportBuilder {
    const CATEGORY: &str = "Connection FSM";

    builder = builder.add_test(
        run_test(
            "FSM-001",
            "Handshake Reaches Connected",
            CATEGORY,
            "Handshake, accept, and auth-succeeded events chain to Connected",
            || {
                let mut fsm = ConnectionFsm::new();
                fsm.apply(ConnEvent::HandshakeSent).map_err(|e| e.to_string())?;
                fsm.apply(ConnEvent::HandshakeAccepted).map_err(|e| e.to_string())?;
                fsm.apply(ConnEvent::AuthSucceeded).map_err(|e| e.to_string())?;
                if !fsm.is_connected() {
                    return Err("fsm should report connected".to_string());
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder = builder.add_test(
        run_test(
            "FSM-002",
            "Illegal Transition Rejected",
            CATEGORY,
            "Applying AuthSucceeded before a handshake is rejected, not silently accepted",
            || {
                let mut fsm = ConnectionFsm::new();
                match fsm.apply(ConnEvent::AuthSucceeded) {
                    Err(_) => Ok(()),
                    Ok(state) => Err(format!("expected rejection, transitioned to {state:?}")),
                }
            },
        )
        .with_priority(TestPriority::High),
    );

    builder
}

fn run_state_tests(mut builder: ReportBuilder) -> ReportBuilder {
    const CATEGORY: &str = "State/Delta Codec";

    builder = builder.add_test(
        run_test(
            "STATE-001",
            "Full Snapshot Roundtrip",
            CATEGORY,
            "A full snapshot applied to an empty table reproduces the source table",
            || {
                let mut table = EntityTable::new();
                table.insert(EntityId(1), EntityState::new(EntityId(1), 1));
                let snap = state::encode_full(10, &table, Default::default());
                let applied = state::apply_delta(&EntityTable::new(), &snap);
                if applied.len() != table.len() {
                    return Err("applied table size mismatch".to_string());
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder = builder.add_test(
        run_test(
            "STATE-002",
            "Delta Against Wrong Baseline Rejected",
            CATEGORY,
            "Applying a delta against a baseline tick it wasn't encoded from fails closed",
            || {
                let table = EntityTable::new();
                let delta = state::encode_delta(5, 6, &table, &table, Default::default());
                match state::try_apply_delta(&table, 999, &delta) {
                    Err(ApplyDeltaError::BaselineMismatch { .. }) => Ok(()),
                    other => Err(format!("expected BaselineMismatch, got {other:?}")),
                }
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder
}

fn run_prediction_tests(mut builder: ReportBuilder) -> ReportBuilder {
    const CATEGORY: &str = "Client Prediction";

    builder = builder.add_test(
        run_test(
            "PREDICT-001",
            "Predict Tick Advances Position",
            CATEGORY,
            "Predicting forward movement moves the locally predicted entity",
            || {
                let mut predictor = Predictor::new(EntityId(1), EntityState::new(EntityId(1), 1));
                let before = predictor.predicted_state().position;
                for _ in 0..10 {
                    predictor.predict_tick(Vec3::new(1.0, 0.0, 0.0), 0.0, 0.0, 0, 1.0 / 60.0);
                }
                let after = predictor.predicted_state().position;
                if after.x <= before.x {
                    return Err("predicted position should advance forward".to_string());
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder = builder.add_test(
        run_test(
            "PREDICT-002",
            "Large Drift Snaps Instantly",
            CATEGORY,
            "A wildly divergent authoritative snapshot triggers a hard correction",
            || {
                let mut predictor = Predictor::new(EntityId(1), EntityState::new(EntityId(1), 1));
                predictor.predict_tick(Vec3::new(1.0, 0.0, 0.0), 0.0, 0.0, 0, 1.0 / 60.0);

                let mut authoritative = EntityState::new(EntityId(1), 1);
                authoritative.position = Vec3::new(500.0, 0.0, 0.0);

                let cfg = EngineConfig::default();
                let report = predictor.reconcile(1, Some(&authoritative), 0, &cfg);
                if report.position_delta < cfg.error_threshold_pos_m {
                    return Err("expected a large position delta to be reported".to_string());
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::High),
    );

    builder
}

fn run_interpolation_tests(mut builder: ReportBuilder) -> ReportBuilder {
    const CATEGORY: &str = "Entity Interpolation";

    builder = builder.add_test(
        run_test(
            "INTERP-001",
            "Sample Straddles Two Snapshots",
            CATEGORY,
            "Sampling between two received ticks blends position rather than snapping",
            || {
                let mut buffer = InterpolationBuffer::new(1.0 / 20.0);
                let entity = EntityId(9);

                let mut a = EntityState::new(entity, 1);
                a.position = Vec3::new(0.0, 0.0, 0.0);
                buffer.push_snapshot(0, &[a]);

                let mut b = EntityState::new(entity, 1);
                b.position = Vec3::new(1.0, 0.0, 0.0);
                buffer.push_snapshot(1, &[b]);

                let pos = sample_position(&buffer, entity, 0.025).ok_or("expected a sample")?;
                if !(pos.x > 0.0 && pos.x < 1.0) {
                    return Err(format!("expected a blended x between 0 and 1, got {}", pos.x));
                }

                let (_, mode) = buffer.sample(entity, 0.025).ok_or("expected a sample")?;
                if mode != SampleMode::Straddled {
                    return Err(format!("expected Straddled, got {mode:?}"));
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::Critical),
    );

    builder
}

fn run_diagnostics_tests(mut builder: ReportBuilder) -> ReportBuilder {
    const CATEGORY: &str = "Diagnostics Counters";

    builder = builder.add_test(
        run_test(
            "DIAG-001",
            "Counters Start At Zero And Accumulate",
            CATEGORY,
            "A freshly created Diagnostics has all-zero counters, and each recorder increments only its own field",
            || {
                let mut diag = Diagnostics::new();
                if diag != Diagnostics::default() {
                    return Err("expected a fresh Diagnostics to equal the default".to_string());
                }

                diag.record_decode_error();
                diag.record_retransmit();
                diag.record_duplicate_datagram();
                diag.record_rate_limit_drop();
                diag.record_reconciliation(true);
                diag.record_reconciliation(false);

                if diag.decode_errors != 1 || diag.retransmits != 1 || diag.duplicate_datagrams != 1 || diag.rate_limit_drops != 1 {
                    return Err(format!("expected each one-shot counter to read 1, got {diag:?}"));
                }
                if diag.reconciliation_snaps != 1 || diag.reconciliation_blends != 1 {
                    return Err(format!("expected one snap and one blend, got {diag:?}"));
                }
                Ok(())
            },
        )
        .with_priority(TestPriority::Medium),
    );

    builder
}
