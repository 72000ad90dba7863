//! Integration tests driving the transport against a scripted peer.
//!
//! The mock EC speaks the real wire format over an in-memory duplex link:
//! it parses host messages byte-exactly, answers with ACK/RETRY/response/
//! event messages, and asserts the ACKs the host owes it. Timeout and
//! retry scenarios run on tokio's paused clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;

use sshub::protocol::wire;
use sshub::{Controller, Error, EventDelay, Request, ResponseBuffer, State};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Build a command message with explicit flag bytes.
fn cmd_message(seq: u8, rqid: u16, tc: u8, iid: u8, cid: u8, flags: (u8, u8), pld: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&wire::SYN);

    let ctrl = [wire::frame_type::CMD, (8 + pld.len()) as u8, 0x00, seq];
    buf.extend_from_slice(&ctrl);
    buf.extend_from_slice(&wire::crc(&ctrl).to_le_bytes());

    let cmd_start = buf.len();
    buf.push(wire::frame_type::CMD);
    buf.push(tc);
    buf.push(flags.0);
    buf.push(flags.1);
    buf.push(iid);
    buf.extend_from_slice(&rqid.to_le_bytes());
    buf.push(cid);
    buf.extend_from_slice(pld);
    let crc = wire::crc(&buf[cmd_start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn request_message(seq: u8, rqid: u16, tc: u8, iid: u8, cid: u8, pld: &[u8]) -> Vec<u8> {
    cmd_message(seq, rqid, tc, iid, cid, (wire::FLAG1_REQUEST, wire::FLAG2_REQUEST), pld)
}

/// A message read from the host side of the link.
#[derive(Debug)]
enum HostMsg {
    Ack {
        seq: u8,
    },
    Request {
        seq: u8,
        rqid: u16,
        tc: u8,
        iid: u8,
        cid: u8,
        payload: Vec<u8>,
        raw: Vec<u8>,
    },
}

/// Scripted peer: parses host traffic and answers per test scenario.
struct MockEc {
    link: DuplexStream,
    seq: u8,
}

impl MockEc {
    fn new(link: DuplexStream) -> Self {
        Self { link, seq: 0 }
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    async fn recv_message(&mut self) -> HostMsg {
        let mut head = [0u8; 8];
        self.link.read_exact(&mut head).await.unwrap();
        assert_eq!(&head[..2], &wire::SYN, "host message must start with SYN");

        let ty = head[2];
        let len = head[3] as usize;
        let seq = head[5];
        assert!(
            wire::is_valid_crc(&head[2..6], &head[6..8]),
            "host ctrl crc must hold"
        );

        match ty {
            wire::frame_type::ACK => {
                let mut term = [0u8; 2];
                self.link.read_exact(&mut term).await.unwrap();
                assert_eq!(term, wire::TERM);
                HostMsg::Ack { seq }
            }
            wire::frame_type::CMD => {
                let mut rest = vec![0u8; len + 2];
                self.link.read_exact(&mut rest).await.unwrap();
                assert!(
                    wire::is_valid_crc(&rest[..len], &rest[len..]),
                    "host cmd crc must hold"
                );
                assert_eq!(rest[0], wire::frame_type::CMD);
                assert_eq!(rest[2], wire::FLAG1_REQUEST);
                assert_eq!(rest[3], wire::FLAG2_REQUEST);

                let mut raw = head.to_vec();
                raw.extend_from_slice(&rest);
                HostMsg::Request {
                    seq,
                    rqid: u16::from_le_bytes([rest[5], rest[6]]),
                    tc: rest[1],
                    iid: rest[4],
                    cid: rest[7],
                    payload: rest[8..len].to_vec(),
                    raw,
                }
            }
            other => panic!("unexpected host frame type {other:#04x}"),
        }
    }

    async fn expect_request(&mut self) -> (u8, u16, u8, u8, u8, Vec<u8>, Vec<u8>) {
        match self.recv_message().await {
            HostMsg::Request {
                seq,
                rqid,
                tc,
                iid,
                cid,
                payload,
                raw,
            } => (seq, rqid, tc, iid, cid, payload, raw),
            other => panic!("expected a request, got {other:?}"),
        }
    }

    async fn expect_ack(&mut self, seq: u8) {
        match self.recv_message().await {
            HostMsg::Ack { seq: got } => assert_eq!(got, seq, "host acked the wrong sequence"),
            other => panic!("expected an ack, got {other:?}"),
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.link.write_all(bytes).await.unwrap();
    }

    async fn send_ack(&mut self, seq: u8) {
        let ack = wire::build_ack_message(seq);
        self.send_raw(&ack).await;
    }

    async fn send_retry(&mut self) {
        let mut buf = Vec::new();
        buf.extend_from_slice(&wire::SYN);
        let ctrl = [wire::frame_type::RETRY, 0x00, 0x00, 0x00];
        buf.extend_from_slice(&ctrl);
        buf.extend_from_slice(&wire::crc(&ctrl).to_le_bytes());
        buf.extend_from_slice(&wire::TERM);
        self.send_raw(&buf).await;
    }

    /// Send a response message; returns the EC sequence the host must ACK.
    async fn send_response(&mut self, rqid: u16, tc: u8, iid: u8, cid: u8, pld: &[u8]) -> u8 {
        let seq = self.next_seq();
        let msg = cmd_message(
            seq,
            rqid,
            tc,
            iid,
            cid,
            (wire::FLAG1_RESPONSE, wire::FLAG2_RESPONSE),
            pld,
        );
        self.send_raw(&msg).await;
        seq
    }

    /// Send an event message; same shape as a response, but with a
    /// request id from the event space. Returns the EC sequence the host
    /// must ACK.
    async fn send_event(&mut self, rqid: u16, tc: u8, iid: u8, cid: u8, pld: &[u8]) -> u8 {
        assert!(rqid != 0 && rqid <= 0x1F, "event ids live in the low bits");
        self.send_response(rqid, tc, iid, cid, pld).await
    }

    /// Answer one request with ACK + status-byte response and consume the
    /// host's response ACK. Returns the request fields.
    async fn answer_request(&mut self, status: u8) -> (u8, u16, u8, u8, u8, Vec<u8>) {
        let (seq, rqid, tc, iid, cid, payload, _raw) = self.expect_request().await;
        self.send_ack(seq).await;
        let resp_seq = self.send_response(rqid, tc, iid, cid, &[status]).await;
        self.expect_ack(resp_seq).await;
        (seq, rqid, tc, iid, cid, payload)
    }

    /// Serve the EC-resume exchange issued by `Controller::open`.
    async fn handle_open(&mut self) {
        let (seq, rqid, tc, _iid, cid, payload) = self.answer_request(0x00).await;
        assert_eq!((tc, cid), (0x01, 0x16), "open must issue EC-resume");
        assert_eq!(seq, 0, "first exchange uses control sequence 0");
        assert_eq!(rqid, 0, "first exchange uses the initial request id");
        assert!(payload.is_empty());
    }
}

/// Open a controller against a scripted peer that has already served the
/// EC-resume handshake.
async fn open_pair() -> (Controller, MockEc) {
    init_tracing();
    let (host_link, ec_link) = tokio::io::duplex(4096);

    let script = tokio::spawn(async move {
        let mut ec = MockEc::new(ec_link);
        ec.handle_open().await;
        ec
    });

    let controller = Controller::open(host_link).await.unwrap();
    let ec = script.await.unwrap();
    (controller, ec)
}

fn simple_request(tc: u8, cid: u8, snc: bool, payload: &[u8]) -> Request<'_> {
    Request {
        target_category: tc,
        target_id: 0x00,
        instance_id: 0x00,
        command_id: cid,
        snc,
        payload,
    }
}

#[tokio::test]
async fn test_open_wakes_ec_and_initializes() {
    let (controller, _ec) = open_pair().await;
    assert_eq!(controller.state(), State::Initialized);
}

/// S1: plain request/response exchange, asserted byte for byte.
#[tokio::test]
async fn test_request_response_roundtrip() {
    let (controller, mut ec) = open_pair().await;

    let script = tokio::spawn(async move {
        let (seq, rqid, tc, iid, cid, payload, raw) = ec.expect_request().await;

        // The open exchange consumed seq 0 / counter 0.
        assert_eq!(seq, 1);
        assert_eq!(rqid, 0x20);
        assert_eq!((tc, iid, cid), (0x02, 0x03, 0x21));
        assert_eq!(payload, vec![0x0F]);
        assert_eq!(raw, request_message(1, 0x20, 0x02, 0x03, 0x21, &[0x0F]));

        ec.send_ack(seq).await;
        let resp_seq = ec.send_response(rqid, tc, iid, cid, &[0x00, 0x42]).await;
        ec.expect_ack(resp_seq).await;
        ec
    });

    let rqst = Request {
        target_category: 0x02,
        target_id: 0x00,
        instance_id: 0x03,
        command_id: 0x21,
        snc: true,
        payload: &[0x0F],
    };
    let mut data = [0u8; 4];
    let mut response = ResponseBuffer::new(&mut data);
    controller.request_with_response(&rqst, &mut response).await.unwrap();

    assert_eq!(response.as_slice(), &[0x00, 0x42]);
    let mut ec = script.await.unwrap();

    // Both counters advanced by exactly one.
    let script = tokio::spawn(async move {
        let (seq, rqid, _, _, _, _, _) = ec.expect_request().await;
        assert_eq!(seq, 2);
        assert_eq!(rqid, 0x40);
        ec.send_ack(seq).await;
    });
    controller
        .request(&simple_request(0x02, 0x22, false, &[]))
        .await
        .unwrap();
    script.await.unwrap();
}

/// S2: the peer stays silent for one timeout; the retransmission is
/// byte-identical and the exchange then succeeds.
#[tokio::test(start_paused = true)]
async fn test_retry_resends_identical_bytes() {
    let (controller, mut ec) = open_pair().await;

    let script = tokio::spawn(async move {
        let (_, _, _, _, _, _, first) = ec.expect_request().await;
        // Silence; the host times out and sends again.
        let (seq, rqid, tc, iid, cid, _, second) = ec.expect_request().await;
        assert_eq!(first, second, "retries must be byte-identical");

        ec.send_ack(seq).await;
        let resp_seq = ec.send_response(rqid, tc, iid, cid, &[0x00]).await;
        ec.expect_ack(resp_seq).await;
    });

    let mut data = [0u8; 1];
    let mut response = ResponseBuffer::new(&mut data);
    controller
        .request_with_response(&simple_request(0x02, 0x21, true, &[]), &mut response)
        .await
        .unwrap();
    script.await.unwrap();
}

/// S3: the peer never answers; the request times out and the counters
/// stay untouched.
#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_times_out() {
    let (controller, mut ec) = open_pair().await;

    let script = tokio::spawn(async move {
        for _ in 0..3 {
            let (seq, rqid, _, _, _, _, _) = ec.expect_request().await;
            assert_eq!(seq, 1);
            assert_eq!(rqid, 0x20);
        }
        // The follow-up request reuses the same counters.
        let (seq, rqid, _, _, _, _, _) = ec.expect_request().await;
        assert_eq!(seq, 1);
        assert_eq!(rqid, 0x20);
        ec.send_ack(seq).await;
    });

    let result = controller.request(&simple_request(0x02, 0x21, false, &[])).await;
    assert!(matches!(result, Err(Error::Timeout)));

    controller
        .request(&simple_request(0x02, 0x21, false, &[]))
        .await
        .unwrap();
    script.await.unwrap();
}

/// The peer answers every try with RETRY; that is retry exhaustion, not a
/// timeout.
#[tokio::test(start_paused = true)]
async fn test_peer_retries_exhaust() {
    let (controller, mut ec) = open_pair().await;

    let script = tokio::spawn(async move {
        for _ in 0..3 {
            let _ = ec.expect_request().await;
            ec.send_retry().await;
        }
    });

    let result = controller.request(&simple_request(0x02, 0x21, false, &[])).await;
    assert!(matches!(result, Err(Error::RetriesExhausted)));
    script.await.unwrap();
}

/// S4: an unsolicited event is ACKed with its sequence and handed to the
/// subscribed handler exactly once.
#[tokio::test]
async fn test_event_dispatch_with_handler() {
    let (controller, mut ec) = open_pair().await;

    let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = oneshot::channel();
    let done_tx = Arc::new(Mutex::new(Some(done_tx)));

    let sink = seen.clone();
    controller
        .set_event_handler(0x03, move |event| {
            sink.lock().unwrap().push(event.payload.to_vec());
            if let Some(done) = done_tx.lock().unwrap().take() {
                let _ = done.send(());
            }
            Ok(())
        })
        .unwrap();

    let event_seq = ec.send_event(0x03, 0x08, 0x00, 0x07, &[0xAA, 0xBB]).await;
    ec.expect_ack(event_seq).await;

    done_rx.await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![vec![0xAA, 0xBB]]);
}

/// S5: an event nobody subscribed to is still ACKed and nothing falls
/// over.
#[tokio::test]
async fn test_unknown_event_still_acked() {
    let (controller, mut ec) = open_pair().await;

    let event_seq = ec.send_event(0x04, 0x08, 0x00, 0x07, &[0x55]).await;
    ec.expect_ack(event_seq).await;

    // The transport stays healthy.
    let script = tokio::spawn(async move {
        let (seq, _, _, _, _, _, _) = ec.expect_request().await;
        ec.send_ack(seq).await;
    });
    controller
        .request(&simple_request(0x02, 0x21, false, &[]))
        .await
        .unwrap();
    script.await.unwrap();
}

/// An `Immediate` subscriber runs on the receive path, before the next
/// message is even parsed.
#[tokio::test]
async fn test_immediate_event_handler() {
    let (controller, mut ec) = open_pair().await;

    let (done_tx, done_rx) = oneshot::channel();
    let done_tx = Arc::new(Mutex::new(Some(done_tx)));
    controller
        .set_delayed_event_handler(
            wire::rqid::RESERVED_KEYBOARD,
            move |event| {
                assert_eq!(event.payload.as_ref(), &[0x1E]);
                if let Some(done) = done_tx.lock().unwrap().take() {
                    let _ = done.send(());
                }
                Ok(())
            },
            |_| EventDelay::Immediate,
        )
        .unwrap();

    let event_seq = ec
        .send_event(wire::rqid::RESERVED_KEYBOARD, 0x08, 0x00, 0x03, &[0x1E])
        .await;
    ec.expect_ack(event_seq).await;
    done_rx.await.unwrap();
}

/// S6: a response with a corrupted command CRC is discarded and the
/// request runs into the response timeout; the ACK already advanced the
/// counters.
#[tokio::test(start_paused = true)]
async fn test_corrupt_response_crc_times_out() {
    let (controller, mut ec) = open_pair().await;

    let script = tokio::spawn(async move {
        let (seq, rqid, tc, iid, cid, _, _) = ec.expect_request().await;
        ec.send_ack(seq).await;

        let mut bad = cmd_message(
            7,
            rqid,
            tc,
            iid,
            cid,
            (wire::FLAG1_RESPONSE, wire::FLAG2_RESPONSE),
            &[0x00],
        );
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        ec.send_raw(&bad).await;
        ec
    });

    let mut data = [0u8; 1];
    let mut response = ResponseBuffer::new(&mut data);
    let result = controller
        .request_with_response(&simple_request(0x02, 0x21, true, &[]), &mut response)
        .await;
    assert!(matches!(result, Err(Error::Timeout)));

    let mut ec = script.await.unwrap();
    let script = tokio::spawn(async move {
        let (seq, rqid, _, _, _, _, _) = ec.expect_request().await;
        assert_eq!(seq, 2);
        assert_eq!(rqid, 0x40);
        ec.send_ack(seq).await;
    });
    controller
        .request(&simple_request(0x02, 0x21, false, &[]))
        .await
        .unwrap();
    script.await.unwrap();
}

/// A response larger than the caller's buffer surfaces as an argument
/// error, not a truncated copy.
#[tokio::test]
async fn test_response_buffer_too_small() {
    let (controller, mut ec) = open_pair().await;

    let script = tokio::spawn(async move {
        let (seq, rqid, tc, iid, cid, _, _) = ec.expect_request().await;
        ec.send_ack(seq).await;
        let _ = ec.send_response(rqid, tc, iid, cid, &[0x01, 0x02, 0x03]).await;
    });

    let mut data = [0u8; 1];
    let mut response = ResponseBuffer::new(&mut data);
    let result = controller
        .request_with_response(&simple_request(0x02, 0x21, true, &[]), &mut response)
        .await;
    assert!(matches!(result, Err(Error::ResponseTooSmall { cap: 1, len: 3 })));
    script.await.unwrap();
}

#[tokio::test]
async fn test_request_argument_validation() {
    let (controller, _ec) = open_pair().await;

    let payload = vec![0u8; sshub::MAX_PAYLOAD + 1];
    let result = controller
        .request(&simple_request(0x02, 0x21, false, &payload))
        .await;
    assert!(matches!(result, Err(Error::PayloadTooLarge { .. })));

    // snc without a response buffer is refused before touching the wire.
    let result = controller.request(&simple_request(0x02, 0x21, true, &[])).await;
    assert!(matches!(result, Err(Error::MissingResponseBuffer)));
}

#[tokio::test]
async fn test_enable_event_source_wire_format() {
    let (controller, mut ec) = open_pair().await;

    let script = tokio::spawn(async move {
        let (_, _, tc, iid, cid, payload) = ec.answer_request(0x00).await;
        assert_eq!((tc, iid, cid), (0x01, 0x00, 0x0B));
        assert_eq!(payload, vec![0x08, 0x01, 0x03, 0x00]);
        ec
    });
    controller.enable_event_source(0x08, 0x01, 0x03).await.unwrap();
    let mut ec = script.await.unwrap();

    let script = tokio::spawn(async move {
        let (_, _, tc, _, cid, payload) = ec.answer_request(0x00).await;
        assert_eq!((tc, cid), (0x01, 0x0C));
        assert_eq!(payload, vec![0x08, 0x01, 0x03, 0x00]);
    });
    controller.disable_event_source(0x08, 0x01, 0x03).await.unwrap();
    script.await.unwrap();

    // Ids outside the event spectrum never reach the wire.
    let result = controller.enable_event_source(0x08, 0x01, 0x20).await;
    assert!(matches!(result, Err(Error::InvalidEventId(0x20))));
}

#[tokio::test]
async fn test_suspend_rejects_requests_until_resume() {
    let (controller, mut ec) = open_pair().await;

    let script = tokio::spawn(async move {
        let (_, _, tc, _, cid, _) = ec.answer_request(0x00).await;
        assert_eq!((tc, cid), (0x01, 0x15));
        ec
    });
    controller.suspend().await.unwrap();
    let mut ec = script.await.unwrap();
    assert_eq!(controller.state(), State::Suspended);

    let result = controller.request(&simple_request(0x02, 0x21, false, &[])).await;
    assert!(matches!(result, Err(Error::Suspended)));

    let script = tokio::spawn(async move {
        let (_, _, tc, _, cid, _) = ec.answer_request(0x00).await;
        assert_eq!((tc, cid), (0x01, 0x16));
        ec
    });
    controller.resume().await.unwrap();
    let mut ec = script.await.unwrap();
    assert_eq!(controller.state(), State::Initialized);

    let script = tokio::spawn(async move {
        let (seq, _, _, _, _, _, _) = ec.expect_request().await;
        ec.send_ack(seq).await;
    });
    controller
        .request(&simple_request(0x02, 0x21, false, &[]))
        .await
        .unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_suspends_ec_and_rejects_requests() {
    let (controller, mut ec) = open_pair().await;

    let script = tokio::spawn(async move {
        let (_, _, tc, _, cid, _) = ec.answer_request(0x00).await;
        assert_eq!((tc, cid), (0x01, 0x15), "shutdown must suspend the EC");
    });
    controller.shutdown().await;
    script.await.unwrap();

    assert_eq!(controller.state(), State::Uninitialized);
    let result = controller.request(&simple_request(0x02, 0x21, false, &[])).await;
    assert!(matches!(result, Err(Error::Uninitialized)));

    // Shutting down twice is fine.
    controller.shutdown().await;
}

/// Removing a handler returns only after a running invocation finished.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_event_handler_waits_for_handler() {
    let (controller, mut ec) = open_pair().await;

    let (started_tx, started_rx) = oneshot::channel();
    let started_tx = Arc::new(Mutex::new(Some(started_tx)));
    let release = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let release_flag = release.clone();
    let finished_flag = finished.clone();
    controller
        .set_event_handler(0x03, move |_| {
            if let Some(started) = started_tx.lock().unwrap().take() {
                let _ = started.send(());
            }
            while !release_flag.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
            finished_flag.store(true, Ordering::Release);
            Ok(())
        })
        .unwrap();

    let event_seq = ec.send_event(0x03, 0x08, 0x00, 0x07, &[]).await;
    ec.expect_ack(event_seq).await;
    started_rx.await.unwrap();

    let remover = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.remove_event_handler(0x03).await })
    };

    // The handler is still spinning, so removal must not have completed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!remover.is_finished());

    release.store(true, Ordering::Release);
    remover.await.unwrap().unwrap();
    assert!(finished.load(Ordering::Acquire));
}

#[tokio::test]
async fn test_consumer_link_keeps_controller_usable() {
    let (controller, mut ec) = open_pair().await;

    let link = controller.consumer_add().unwrap();

    let script = tokio::spawn(async move {
        let (seq, _, _, _, _, _, _) = ec.expect_request().await;
        ec.send_ack(seq).await;
    });
    link.controller()
        .request(&simple_request(0x02, 0x21, false, &[]))
        .await
        .unwrap();
    script.await.unwrap();

    Controller::consumer_remove(link);
}

#[cfg(feature = "base-status-quirk")]
#[tokio::test]
async fn test_base_status_quirk_short_circuits() {
    let (controller, _ec) = open_pair().await;

    let rqst = Request {
        target_category: 0x11,
        target_id: 0x00,
        instance_id: 0x00,
        command_id: 0x0D,
        snc: true,
        payload: &[],
    };
    let mut data = [0u8; 1];
    let mut response = ResponseBuffer::new(&mut data);

    // No peer interaction: the mock EC is never consulted.
    controller.request_with_response(&rqst, &mut response).await.unwrap();
    assert_eq!(response.as_slice(), &[0x01]);
}

/// The quirk answers requests, it does not bypass the state machine:
/// outside `Initialized` the matching request fails like any other.
#[cfg(feature = "base-status-quirk")]
#[tokio::test]
async fn test_base_status_quirk_respects_state_machine() {
    let (controller, mut ec) = open_pair().await;

    let rqst = Request {
        target_category: 0x11,
        target_id: 0x00,
        instance_id: 0x00,
        command_id: 0x0D,
        snc: true,
        payload: &[],
    };

    let script = tokio::spawn(async move {
        let (_, _, tc, _, cid, _) = ec.answer_request(0x00).await;
        assert_eq!((tc, cid), (0x01, 0x15));
        ec
    });
    controller.suspend().await.unwrap();
    let mut ec = script.await.unwrap();

    let mut data = [0u8; 1];
    let mut response = ResponseBuffer::new(&mut data);
    let result = controller.request_with_response(&rqst, &mut response).await;
    assert!(matches!(result, Err(Error::Suspended)));

    // Tear down from the suspended state; the quirk must not answer on an
    // uninitialized controller either.
    let script = tokio::spawn(async move {
        let (_, _, tc, _, cid, _) = ec.answer_request(0x00).await;
        assert_eq!((tc, cid), (0x01, 0x15));
    });
    controller.shutdown().await;
    script.await.unwrap();

    let mut data = [0u8; 1];
    let mut response = ResponseBuffer::new(&mut data);
    let result = controller.request_with_response(&rqst, &mut response).await;
    assert!(matches!(result, Err(Error::Uninitialized)));
}
