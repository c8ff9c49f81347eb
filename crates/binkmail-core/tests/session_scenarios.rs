//! Session scenarios driven through the public API.
//!
//! The in-crate unit tests walk the state machine; these play the peer
//! by hand — crafting the exact frames a remote mailer would send — to
//! pin the visible protocol behavior: skip handling, restart offsets,
//! compression accounting, and error replies.

use std::time::Instant;

use binkmail_core::{
    FeatureMode, OutboundFile, PostAction, Role, SessionAction, SessionConfig, SessionError,
    SessionMachine, SessionState,
};
use binkmail_proto::{Address, Command, FileRef, Frame};

fn config(dir: &std::path::Path) -> SessionConfig {
    let inbound = dir.join("inbound");
    std::fs::create_dir_all(&inbound).unwrap();
    let mut config = SessionConfig::new(Address::new(2, 5020, 999), inbound);
    config.expected_remote = Some(Address::new(1, 234, 56));
    config
}

/// Collect the frames out of a batch of actions.
fn frames(actions: Vec<SessionAction>) -> Vec<Frame> {
    actions
        .into_iter()
        .filter_map(|action| match action {
            SessionAction::SendFrame(frame) => Some(frame),
            SessionAction::Close { .. } => None,
        })
        .collect()
}

/// Commands out of a batch of actions, data frames dropped.
fn commands(actions: Vec<SessionAction>) -> Vec<Command> {
    frames(actions)
        .iter()
        .filter(|frame| frame.is_command)
        .map(|frame| Command::from_frame(frame).unwrap())
        .collect()
}

/// Walk an originator into the transfer phase against a peer that
/// requires no password.
fn originator_in_transfer(machine: &mut SessionMachine, now: Instant) -> Vec<SessionAction> {
    machine.start(now).unwrap();
    let adr = Command::Address(vec![Address::new(1, 234, 56)]).to_frame().unwrap();
    let actions = machine.handle_frame(&adr, now).unwrap();
    assert_eq!(machine.state(), SessionState::Transfer);
    actions
}

#[test]
fn skip_refuses_a_sent_file_without_post_action() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("big.zip");
    std::fs::write(&payload, vec![7u8; 100_000]).unwrap();

    let mut machine = SessionMachine::new(Role::Originator, config(dir.path()));
    machine.enqueue(OutboundFile::from_path(&payload, PostAction::Delete, 1).unwrap());
    let now = Instant::now();

    // The first transfer batch offers the file, streams it, and — the
    // queue being otherwise empty — ends with our EOB.
    let first_batch = commands(originator_in_transfer(&mut machine, now));
    assert!(matches!(first_batch.first(), Some(Command::File(_))));
    assert!(first_batch.iter().any(|c| matches!(c, Command::Eob)));

    // The peer refuses the file instead of acknowledging it.
    let skip = Command::Skip(FileRef { name: "big.zip".into(), offset: 0 })
        .to_frame()
        .unwrap();
    machine.handle_frame(&skip, now).unwrap();

    let eob = Command::Eob.to_frame().unwrap();
    machine.handle_frame(&eob, now).unwrap();
    assert_eq!(machine.state(), SessionState::Done);

    // Non-destructive: no post-action, no completion, file intact.
    assert!(payload.exists());
    assert_eq!(machine.summary().files_sent, 0);
    assert!(machine.take_completions().is_empty());
}

#[test]
fn get_restarts_an_already_streamed_file() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("data.zip");
    let body: Vec<u8> = (0u32..40_000).map(|i| (i % 13) as u8).collect();
    std::fs::write(&payload, &body).unwrap();

    let mut machine = SessionMachine::new(Role::Originator, config(dir.path()));
    machine.enqueue(OutboundFile::from_path(&payload, PostAction::Keep, 1).unwrap());
    let now = Instant::now();

    // Drain the whole first pass (offer + data + EOB).
    let mut first_pass = frames(originator_in_transfer(&mut machine, now));
    while !machine.is_finished() {
        let more = frames(machine.poll_send(now).unwrap());
        if more.is_empty() {
            break;
        }
        first_pass.extend(more);
    }
    let streamed: usize =
        first_pass.iter().filter(|f| !f.is_command).map(|f| f.payload.len()).sum();
    assert_eq!(streamed, body.len());

    // The peer's receive went bad; it asks for the tail again.
    let get = Command::Get(FileRef { name: "data.zip".into(), offset: 30_000 })
        .to_frame()
        .unwrap();
    let restart = frames(machine.handle_frame(&get, now).unwrap());
    let Some(Command::File(offer)) = restart
        .iter()
        .filter(|f| f.is_command)
        .map(|f| Command::from_frame(f).unwrap())
        .next()
    else {
        panic!("expected a fresh offer after M_GET");
    };
    assert_eq!(offer.offset, 30_000);

    let retail: usize = restart.iter().filter(|f| !f.is_command).map(|f| f.payload.len()).sum();
    let mut total = retail;
    loop {
        let more = frames(machine.poll_send(now).unwrap());
        if more.is_empty() {
            break;
        }
        total += more.iter().filter(|f| !f.is_command).map(|f| f.payload.len()).sum::<usize>();
    }
    assert_eq!(total, 10_000, "only the tail is resent");

    // Ack and close out.
    let got = Command::Got(binkmail_proto::FileAck { name: "data.zip".into(), size: 40_000 })
        .to_frame()
        .unwrap();
    machine.handle_frame(&got, now).unwrap();
    machine.handle_frame(&Command::Eob.to_frame().unwrap(), now).unwrap();
    let _ = machine.poll_send(now).unwrap();
    assert_eq!(machine.state(), SessionState::Done);
    assert_eq!(machine.summary().files_sent, 1);
}

#[test]
fn plz_sessions_account_their_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let payload = dir.path().join("text.pkt");
    std::fs::write(&payload, vec![b'A'; 60_000]).unwrap();

    let mut config = config(dir.path());
    config.options.plz = FeatureMode::Required;
    let mut machine = SessionMachine::new(Role::Originator, config);
    machine.enqueue(OutboundFile::from_path(&payload, PostAction::Keep, 1).unwrap());
    let now = Instant::now();

    machine.start(now).unwrap();
    // The peer advertises PLZ in its greeting, then presents addresses.
    let opt = Command::Nul("OPT PLZ".to_string()).to_frame().unwrap();
    machine.handle_frame(&opt, now).unwrap();
    let adr = Command::Address(vec![Address::new(1, 234, 56)]).to_frame().unwrap();
    let mut wire = frames(machine.handle_frame(&adr, now).unwrap());
    assert_eq!(machine.state(), SessionState::Transfer);

    loop {
        let more = frames(machine.poll_send(now).unwrap());
        if more.is_empty() {
            break;
        }
        wire.extend(more);
    }

    // Runs of 'A' compress well; the wire carries far fewer data bytes
    // than the file holds, and the codec's ledger says so.
    let data_bytes: usize = wire.iter().filter(|f| !f.is_command).map(|f| f.payload.len()).sum();
    assert!(data_bytes < 60_000 / 10, "60k of 'A' should compress hard, got {data_bytes}");

    let stats = machine.plz_stats().expect("PLZ was negotiated");
    assert!(stats.compressed_out > 0);
    assert_eq!(stats.compressed_out as usize, data_bytes);
}

#[test]
fn required_plz_refused_when_peer_lacks_it() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.options.plz = FeatureMode::Required;
    let mut machine = SessionMachine::new(Role::Originator, config);
    let now = Instant::now();

    machine.start(now).unwrap();
    let adr = Command::Address(vec![Address::new(1, 234, 56)]).to_frame().unwrap();
    let err = machine.handle_frame(&adr, now).unwrap_err();
    assert!(matches!(err, SessionError::AuthFailed(_)));

    // The abort batch tells the peer why before closing.
    let aborts = machine.abort_actions(&err);
    let cmds = commands(aborts);
    assert!(matches!(cmds.first(), Some(Command::Err(_))));
    assert_eq!(machine.state(), SessionState::Failed);
}

#[test]
fn data_frame_before_authentication_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut machine = SessionMachine::new(Role::Answerer, config(dir.path()));
    let now = Instant::now();

    machine.start(now).unwrap();
    let sneaky = Frame::data(&b"no handshake"[..]).unwrap();
    let err = machine.handle_frame(&sneaky, now).unwrap_err();
    assert!(matches!(err, SessionError::Unexpected { .. }));
}
