use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bstr::{BStr, BString};
use gix_hash::ObjectId;
use gix_smart_core::packet::{AckStatus, Packet, RefRecord};
use gix_smart_core::reader::{ProgressSink, SharedProgress};
use gix_smart_transport::{
    Direction, Error, Service, SmartStream, SmartSubtransport, SmartTransport, TransportFlags,
};
use pretty_assertions::assert_eq;

const MAIN: &str = "a65fedf39aefe402d3bb6e24df4d4f5fe4547750";
const DEV: &str = "be3563ae3f795b2b4353bcce3a527ad0a4f7f644";

fn oid(hex: &str) -> ObjectId {
    ObjectId::from_hex(hex.as_bytes()).expect("valid hex")
}

fn wire(packets: &[Packet]) -> Vec<u8> {
    let mut buf = Vec::new();
    for packet in packets {
        packet.write_to(&mut buf).expect("write to vec");
    }
    buf
}

fn ref_with_caps(hex: &str, name: &str, caps: &str) -> Packet {
    Packet::Ref(RefRecord {
        id: oid(hex),
        name: name.into(),
        capabilities: Some(caps.into()),
    })
}

fn band(channel: u8, data: &[u8]) -> Packet {
    let mut frame = vec![channel];
    frame.extend_from_slice(data);
    Packet::Data(frame)
}

/// One scripted exchange: bytes the "remote" sends, and a shared sink
/// recording everything the session writes.
struct ScriptedStream {
    input: Cursor<Vec<u8>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    opened: Mutex<Vec<Service>>,
    written: Arc<Mutex<Vec<u8>>>,
    closed: AtomicUsize,
}

struct ScriptedSubtransport {
    stateless: bool,
    responses: Mutex<VecDeque<Vec<u8>>>,
    recorder: Arc<Recorder>,
}

impl ScriptedSubtransport {
    fn new(stateless: bool, responses: Vec<Vec<u8>>) -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (
            Self {
                stateless,
                responses: Mutex::new(responses.into()),
                recorder: Arc::clone(&recorder),
            },
            recorder,
        )
    }
}

impl SmartSubtransport for ScriptedSubtransport {
    fn action(
        &mut self,
        _url: &str,
        service: Service,
    ) -> gix_smart_transport::Result<Box<dyn SmartStream>> {
        self.recorder.opened.lock().unwrap().push(service);
        let input = self.responses.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedStream {
            input: Cursor::new(input),
            output: Arc::clone(&self.recorder.written),
        }))
    }

    fn close(&mut self) -> gix_smart_transport::Result<()> {
        self.recorder.closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_stateless(&self) -> bool {
        self.stateless
    }
}

fn stateless_advertisement() -> Vec<u8> {
    wire(&[
        Packet::Comment(" service=git-upload-pack".into()),
        Packet::Flush,
        ref_with_caps(MAIN, "refs/heads/main", "multi_ack side-band-64k agent=git/2.40.0"),
        Packet::Ref(RefRecord::new(oid(DEV), "refs/heads/dev")),
        Packet::Flush,
    ])
}

fn collect_ref_names(session: &SmartTransport<ScriptedSubtransport>) -> Vec<BString> {
    let mut names = Vec::new();
    session
        .list_refs(|r| {
            names.push(r.name.clone());
            true
        })
        .expect("refs are loaded");
    names
}

#[test]
fn stateless_connect_loads_refs_and_capabilities() -> anyhow::Result<()> {
    let (subtransport, recorder) = ScriptedSubtransport::new(true, vec![stateless_advertisement()]);
    let mut session = SmartTransport::new(subtransport);

    session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    assert!(session.is_connected());
    assert_eq!(
        collect_ref_names(&session),
        vec![BString::from("refs/heads/main"), BString::from("refs/heads/dev")]
    );
    assert!(session.capabilities().contains("side-band-64k"));
    assert_eq!(session.capabilities().value_of("agent").unwrap(), "git/2.40.0");
    assert_eq!(*recorder.opened.lock().unwrap(), vec![Service::UploadPackLs]);
    Ok(())
}

#[test]
fn stateless_connect_requires_the_leading_comment() {
    let advertisement = wire(&[
        ref_with_caps(MAIN, "refs/heads/main", "multi_ack"),
        Packet::Flush,
        Packet::Flush,
    ]);
    let (subtransport, _) = ScriptedSubtransport::new(true, vec![advertisement]);
    let mut session = SmartTransport::new(subtransport);

    let err = session
        .connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())
        .unwrap_err();
    assert!(matches!(err, Error::Protocol("invalid response")));
    assert!(!session.is_connected());
}

#[test]
fn stateful_connect_needs_a_single_flush_and_no_comment() -> anyhow::Result<()> {
    let advertisement = wire(&[
        ref_with_caps(MAIN, "refs/heads/main", "multi_ack"),
        Packet::Flush,
    ]);
    let (subtransport, _) = ScriptedSubtransport::new(false, vec![advertisement]);
    let mut session = SmartTransport::new(subtransport);

    session.connect("git://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    assert!(session.is_connected());
    assert_eq!(collect_ref_names(&session), vec![BString::from("refs/heads/main")]);
    Ok(())
}

#[test]
fn truncated_advertisement_is_a_protocol_error() {
    let advertisement = wire(&[ref_with_caps(MAIN, "refs/heads/main", "multi_ack")]);
    let (subtransport, _) = ScriptedSubtransport::new(false, vec![advertisement]);
    let mut session = SmartTransport::new(subtransport);

    let err = session
        .connect("git://example.com/repo.git", Direction::Fetch, TransportFlags::default())
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert!(!session.is_connected());
}

#[test]
fn capabilities_placeholder_of_an_empty_repository_is_dropped() -> anyhow::Result<()> {
    let zero = "0".repeat(40);
    let advertisement = wire(&[
        ref_with_caps(&zero, "capabilities^{}", "multi_ack agent=git/2.40.0"),
        Packet::Flush,
    ]);
    let (subtransport, _) = ScriptedSubtransport::new(false, vec![advertisement]);
    let mut session = SmartTransport::new(subtransport);

    session.connect("git://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    assert!(session.is_connected());
    assert_eq!(collect_ref_names(&session), Vec::<BString>::new());
    assert!(session.capabilities().contains("multi_ack"));
    Ok(())
}

#[test]
fn empty_url_is_an_argument_error() {
    let (subtransport, _) = ScriptedSubtransport::new(true, vec![]);
    let mut session = SmartTransport::new(subtransport);
    let err = session
        .connect("", Direction::Fetch, TransportFlags::default())
        .unwrap_err();
    assert!(matches!(err, Error::Argument(_)));
    assert!(!session.is_connected());
}

#[test]
fn list_refs_before_connect_fails() {
    let (subtransport, _) = ScriptedSubtransport::new(true, vec![]);
    let session = SmartTransport::new(subtransport);
    let err = session.list_refs(|_| panic!("must not be visited")).unwrap_err();
    assert!(matches!(err, Error::RefsNotLoaded));
}

#[test]
fn cancel_before_list_refs_reports_cancellation_without_visiting() -> anyhow::Result<()> {
    let (subtransport, _) = ScriptedSubtransport::new(true, vec![stateless_advertisement()]);
    let mut session = SmartTransport::new(subtransport);
    session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    session.cancel();
    let err = session.list_refs(|_| panic!("must not be visited")).unwrap_err();
    assert!(err.is_cancellation());
    Ok(())
}

#[test]
fn cancellation_handle_works_from_outside() -> anyhow::Result<()> {
    let (subtransport, _) = ScriptedSubtransport::new(true, vec![stateless_advertisement()]);
    let mut session = SmartTransport::new(subtransport);
    session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    let handle = session.cancellation();
    std::thread::spawn(move || handle.cancel()).join().unwrap();

    let err = session.list_refs(|_| true).unwrap_err();
    assert!(err.is_cancellation());
    Ok(())
}

#[test]
fn aborting_visitor_stops_the_walk_as_cancellation() -> anyhow::Result<()> {
    let (subtransport, _) = ScriptedSubtransport::new(true, vec![stateless_advertisement()]);
    let mut session = SmartTransport::new(subtransport);
    session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    let mut visited = 0;
    let err = session
        .list_refs(|_| {
            visited += 1;
            false
        })
        .unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(visited, 1);
    Ok(())
}

#[test]
fn reconnect_clears_the_cancellation_flag() -> anyhow::Result<()> {
    let (subtransport, _) = ScriptedSubtransport::new(
        true,
        vec![stateless_advertisement(), stateless_advertisement()],
    );
    let mut session = SmartTransport::new(subtransport);
    session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;
    session.cancel();

    session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;
    assert_eq!(collect_ref_names(&session).len(), 2);
    Ok(())
}

#[test]
fn negotiation_is_fetch_only_and_push_stream_is_push_only() -> anyhow::Result<()> {
    let (subtransport, _) = ScriptedSubtransport::new(true, vec![stateless_advertisement()]);
    let mut session = SmartTransport::new(subtransport);
    session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    let err = session.push_stream().unwrap_err();
    assert!(matches!(err, Error::WrongDirection(Direction::Push)));

    let advertisement = wire(&[
        Packet::Comment(" service=git-receive-pack".into()),
        Packet::Flush,
        ref_with_caps(MAIN, "refs/heads/main", "report-status delete-refs"),
        Packet::Flush,
    ]);
    let (subtransport, _) = ScriptedSubtransport::new(true, vec![advertisement, Vec::new()]);
    let mut session = SmartTransport::new(subtransport);
    session.connect("https://example.com/repo.git", Direction::Push, TransportFlags::default())?;

    let err = session.begin_negotiation(b"want ...").unwrap_err();
    assert!(matches!(err, Error::WrongDirection(Direction::Fetch)));

    session.push_stream()?.write_all(b"pack bytes")?;
    Ok(())
}

#[test]
fn rpc_negotiation_reopens_a_stream_and_writes_the_payload() -> anyhow::Result<()> {
    let payload = b"0032want a65fedf39aefe402d3bb6e24df4d4f5fe4547750\n00000009done\n";
    let response = wire(&[Packet::Ack {
        id: oid(MAIN),
        status: Some(AckStatus::Common),
    }]);
    let (subtransport, recorder) =
        ScriptedSubtransport::new(true, vec![stateless_advertisement(), response]);
    let mut session = SmartTransport::new(subtransport);
    session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    session.begin_negotiation(payload)?;
    assert_eq!(
        *recorder.opened.lock().unwrap(),
        vec![Service::UploadPackLs, Service::UploadPack]
    );
    assert_eq!(*recorder.written.lock().unwrap(), payload.to_vec());

    let answer = session.read_acknowledgement()?;
    assert!(matches!(answer, Packet::Ack { status: Some(AckStatus::Common), .. }));
    assert_eq!(session.common().len(), 1);
    Ok(())
}

#[test]
fn a_nak_answer_is_not_recorded_as_common() -> anyhow::Result<()> {
    let advertisement = wire(&[ref_with_caps(MAIN, "refs/heads/main", "multi_ack"), Packet::Flush]);
    let response = wire(&[Packet::Nak]);
    let (subtransport, recorder) =
        ScriptedSubtransport::new(false, vec![advertisement, response]);
    let mut session = SmartTransport::new(subtransport);
    session.connect("git://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    session.begin_negotiation(b"0009done\n")?;
    assert_eq!(session.read_acknowledgement()?, Packet::Nak);
    assert!(session.common().is_empty());
    // The stateful connection was never closed between phases.
    assert_eq!(recorder.closed.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn pack_stream_demuxes_sideband_and_reports_progress() -> anyhow::Result<()> {
    let advertisement = wire(&[
        ref_with_caps(MAIN, "refs/heads/main", "multi_ack side-band-64k"),
        Packet::Flush,
    ]);
    let response = wire(&[
        Packet::Nak,
        band(1, b"PACK"),
        band(2, b"Counting objects: 3"),
        band(1, b"remainder"),
        Packet::Flush,
    ]);
    let (subtransport, _) = ScriptedSubtransport::new(false, vec![advertisement, response]);
    let mut session = SmartTransport::new(subtransport);

    let progress: Arc<Mutex<Vec<BString>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    session.set_callbacks(
        Some(Box::new(move |text: &BStr| {
            sink.lock().unwrap().push(text.to_owned());
        })),
        None,
        None,
    );

    session.connect("git://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;
    session.begin_negotiation(b"0009done\n")?;
    assert_eq!(session.read_acknowledgement()?, Packet::Nak);

    let mut pack = Vec::new();
    session.pack_stream()?.read_to_end(&mut pack)?;
    assert_eq!(pack, b"PACKremainder".to_vec());
    assert_eq!(*progress.lock().unwrap(), vec![BString::from("Counting objects: 3")]);
    Ok(())
}

#[test]
fn remote_error_packets_abort_the_connect() {
    let advertisement = wire(&[Packet::Err("access denied".into()), Packet::Flush]);
    let (subtransport, _) = ScriptedSubtransport::new(false, vec![advertisement]);
    let mut session = SmartTransport::new(subtransport);

    let errors: Arc<Mutex<Vec<BString>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    session.set_callbacks(
        None,
        Some(Box::new(move |text: &BStr| {
            sink.lock().unwrap().push(text.to_owned());
        })),
        None,
    );

    let err = session
        .connect("git://example.com/repo.git", Direction::Fetch, TransportFlags::default())
        .unwrap_err();
    match err {
        Error::Remote(message) => assert_eq!(message, "access denied"),
        other => panic!("expected a remote error, got {other:?}"),
    }
    assert_eq!(*errors.lock().unwrap(), vec![BString::from("access denied")]);
}

#[derive(Default)]
struct ByteCounter(AtomicUsize);

impl ProgressSink for ByteCounter {
    fn bytes_received(&self, count: usize) {
        self.0.fetch_add(count, Ordering::Relaxed);
    }
}

#[test]
fn received_bytes_are_reported_to_the_progress_sink() -> anyhow::Result<()> {
    let advertisement = wire(&[
        ref_with_caps(MAIN, "refs/heads/main", "multi_ack"),
        Packet::Flush,
    ]);
    let advertised = advertisement.len();
    let (subtransport, _) = ScriptedSubtransport::new(false, vec![advertisement]);
    let mut session = SmartTransport::new(subtransport);

    let counter = Arc::new(ByteCounter::default());
    let sink: SharedProgress = counter.clone();
    session.set_callbacks(None, None, Some(sink));

    session.connect("git://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;
    assert_eq!(counter.0.load(Ordering::Relaxed), advertised);
    Ok(())
}

#[test]
fn flags_are_captured_at_connect_time() -> anyhow::Result<()> {
    let (subtransport, _) = ScriptedSubtransport::new(true, vec![stateless_advertisement()]);
    let mut session = SmartTransport::new(subtransport);
    assert_eq!(session.flags(), TransportFlags::default());

    let flags = TransportFlags {
        no_check_certificate: true,
    };
    session.connect("https://example.com/repo.git", Direction::Fetch, flags)?;
    assert_eq!(session.flags(), flags);
    Ok(())
}

#[test]
fn close_is_idempotent_and_clears_session_state() -> anyhow::Result<()> {
    let (subtransport, recorder) = ScriptedSubtransport::new(true, vec![stateless_advertisement()]);
    let mut session = SmartTransport::new(subtransport);
    session.connect("https://example.com/repo.git", Direction::Fetch, TransportFlags::default())?;

    session.close()?;
    assert!(!session.is_connected());
    assert!(matches!(session.list_refs(|_| true), Err(Error::RefsNotLoaded)));
    assert!(session.common().is_empty());

    session.close()?;
    assert!(!session.is_connected());
    assert!(recorder.closed.load(Ordering::Relaxed) >= 2);
    Ok(())
}
