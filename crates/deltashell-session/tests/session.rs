mod common;

use std::time::Duration;

use common::{SENTINEL, scripted, spawn_echo_responder};
use deltashell_core::{CommandOutcome, SessionConfig, SessionError, SessionStatus};
use deltashell_session::Session;
use tokio::sync::oneshot;
use tokio_test::{assert_err, assert_ok};

fn config() -> SessionConfig {
    SessionConfig::default().with_sentinel(SENTINEL)
}

#[tokio::test]
async fn resolves_output_split_inside_sentinel() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    let result = assert_ok!(session.submit("echo hi"));
    assert_eq!(ctl.next_write().await, "echo hi; echo __DONE__\n");

    ctl.emit("hi\n__DON");
    ctl.emit("E__\n");

    assert_eq!(result.await, CommandOutcome::Completed("hi".into()));
    session.close().await;
}

#[tokio::test]
async fn second_command_waits_for_first_sentinel() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    let a = assert_ok!(session.submit("a"));
    let b = assert_ok!(session.submit("b"));

    assert_eq!(ctl.next_write().await, "a; echo __DONE__\n");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ctl.try_next_write(), None, "b written before a finished");
    assert_eq!(session.status(), SessionStatus::Busy);

    ctl.emit("A\n__DONE__\n");
    assert_eq!(ctl.next_write().await, "b; echo __DONE__\n");
    ctl.emit("B\n__DONE__\n");

    assert_eq!(a.await, CommandOutcome::Completed("A".into()));
    assert_eq!(b.await, CommandOutcome::Completed("B".into()));
    session.close().await;
}

#[tokio::test]
async fn results_follow_submission_order() {
    let (interpreter, ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));
    let responder = spawn_echo_responder(ctl);

    let pending: Vec<_> = (0..20)
        .map(|i| assert_ok!(session.submit(format!("cmd{i}"))))
        .collect();

    for (i, result) in pending.into_iter().enumerate() {
        assert_eq!(result.await, CommandOutcome::Completed(format!("out:cmd{i}")));
    }

    session.close().await;
    assert_eq!(assert_ok!(responder.await), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submitters_get_their_own_results() {
    let (interpreter, ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));
    let responder = spawn_echo_responder(ctl);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                let text = format!("w{worker}-{i}");
                let outcome = session.submit(text.clone()).unwrap().await;
                assert_eq!(outcome, CommandOutcome::Completed(format!("out:{text}")));
            }
        }));
    }
    for task in tasks {
        assert_ok!(task.await);
    }

    session.close().await;
    assert_eq!(assert_ok!(responder.await), 80);
}

#[tokio::test]
async fn callback_sink_receives_outcome_once() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    let (tx, rx) = oneshot::channel();
    assert_ok!(session.submit_with("uptime", move |outcome| {
        let _ = tx.send(outcome);
    }));

    assert_eq!(ctl.next_write().await, "uptime; echo __DONE__\n");
    ctl.emit("up 3 days\n__DONE__\n");

    assert_eq!(assert_ok!(rx.await), CommandOutcome::Completed("up 3 days".into()));
    session.close().await;
}

#[tokio::test]
async fn output_before_any_command_is_discarded() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    ctl.emit("stale\n__DONE__\n");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = assert_ok!(session.submit("date"));
    assert_eq!(ctl.next_write().await, "date; echo __DONE__\n");
    ctl.emit("today\n__DONE__\n");

    assert_eq!(result.await, CommandOutcome::Completed("today".into()));
    session.close().await;
}

#[tokio::test]
async fn close_cancels_in_flight_and_queued_commands() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    let a = assert_ok!(session.submit("sleep 100"));
    let b = assert_ok!(session.submit("echo never"));
    assert_eq!(ctl.next_write().await, "sleep 100; echo __DONE__\n");

    session.close().await;

    assert_eq!(a.await, CommandOutcome::Cancelled);
    assert_eq!(b.await, CommandOutcome::Cancelled);
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(matches!(
        assert_err!(session.submit("echo late")),
        SessionError::Closed
    ));
}

#[tokio::test]
async fn close_is_idempotent() {
    let (interpreter, ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));
    let other = session.clone();

    session.close().await;
    session.close().await;
    other.close().await;

    assert_eq!(ctl.terminations(), 1);
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test]
async fn stream_end_fails_pending_commands() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    let a = assert_ok!(session.submit("exit"));
    let b = assert_ok!(session.submit("echo after"));
    assert_eq!(ctl.next_write().await, "exit; echo __DONE__\n");

    ctl.emit("partial output");
    ctl.end_output();

    assert_eq!(a.await, CommandOutcome::ProcessExited);
    assert_eq!(b.await, CommandOutcome::ProcessExited);
    session.closed().await;
    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(matches!(
        assert_err!(session.submit("echo late")),
        SessionError::Closed
    ));
}

#[tokio::test]
async fn write_failure_resolves_command_and_keeps_session() {
    let (interpreter, ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    ctl.fail_writes();
    let a = assert_ok!(session.submit("a"));
    let b = assert_ok!(session.submit("b"));

    assert!(matches!(a.await, CommandOutcome::WriteFailed(reason) if reason.contains("broken pipe")));
    assert!(matches!(b.await, CommandOutcome::WriteFailed(_)));
    assert_eq!(session.status(), SessionStatus::Idle);
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn missing_sentinel_times_out_and_closes() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    let slow = assert_ok!(session.submit_with_timeout("sleep 999", Some(Duration::from_secs(5))));
    let queued = assert_ok!(session.submit("echo queued"));
    assert_eq!(ctl.next_write().await, "sleep 999; echo __DONE__\n");

    assert_eq!(slow.await, CommandOutcome::TimedOut);
    assert_eq!(queued.await, CommandOutcome::Cancelled);
    session.closed().await;
    assert_eq!(ctl.terminations(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_starts_when_command_is_written() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    let first = assert_ok!(session.submit_with_timeout("first", None));
    let second = assert_ok!(session.submit_with_timeout("second", Some(Duration::from_secs(5))));
    assert_eq!(ctl.next_write().await, "first; echo __DONE__\n");

    // Longer than the second command's timeout, while it is still queued.
    tokio::time::sleep(Duration::from_secs(30)).await;
    ctl.emit("1\n__DONE__\n");
    assert_eq!(first.await, CommandOutcome::Completed("1".into()));

    assert_eq!(ctl.next_write().await, "second; echo __DONE__\n");
    ctl.emit("2\n__DONE__\n");
    assert_eq!(second.await, CommandOutcome::Completed("2".into()));
    session.close().await;
}

#[tokio::test(start_paused = true)]
async fn default_timeout_comes_from_config() {
    let (interpreter, mut ctl) = scripted();
    let config = config().with_command_timeout(Some(Duration::from_secs(2)));
    let session = assert_ok!(Session::spawn(interpreter, config));

    let result = assert_ok!(session.submit("hang"));
    assert_eq!(ctl.next_write().await, "hang; echo __DONE__\n");
    assert_eq!(result.await, CommandOutcome::TimedOut);
}

#[tokio::test]
async fn oversized_output_fails_command() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config().with_max_buffer_bytes(16)));

    let result = assert_ok!(session.submit("yes"));
    assert_eq!(ctl.next_write().await, "yes; echo __DONE__\n");
    ctl.emit(&"y\n".repeat(32));

    assert_eq!(result.await, CommandOutcome::OutputOverflow);
    session.closed().await;
}

#[tokio::test]
async fn dropping_every_handle_cancels_pending_work() {
    let (interpreter, mut ctl) = scripted();
    let session = assert_ok!(Session::spawn(interpreter, config()));

    let (tx, rx) = oneshot::channel();
    assert_ok!(session.submit_with("sleep 100", move |outcome| {
        let _ = tx.send(outcome);
    }));
    assert_eq!(ctl.next_write().await, "sleep 100; echo __DONE__\n");
    drop(session);

    assert_eq!(assert_ok!(rx.await), CommandOutcome::Cancelled);
    assert_eq!(ctl.recv_write().await, None);
    assert_eq!(ctl.terminations(), 1);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let (interpreter, _ctl) = scripted();
    let err = assert_err!(Session::spawn(interpreter, SessionConfig::default().with_sentinel("")));
    assert!(matches!(err, SessionError::Config(_)));

    // The shell would collapse the spaces, so the echo could never match.
    let (interpreter, _ctl) = scripted();
    let config = SessionConfig::default().with_sentinel("END  MARK");
    assert!(matches!(
        assert_err!(Session::spawn(interpreter, config)),
        SessionError::Config(_)
    ));
}

#[tokio::test]
async fn independent_sessions_do_not_share_state() {
    let (first_interp, mut first_ctl) = scripted();
    let (second_interp, mut second_ctl) = scripted();
    let first = assert_ok!(Session::spawn(first_interp, config()));
    let second = assert_ok!(Session::spawn(second_interp, config()));
    assert_ne!(first.id(), second.id());

    let a = assert_ok!(first.submit("a"));
    let b = assert_ok!(second.submit("b"));
    assert_eq!(first_ctl.next_write().await, "a; echo __DONE__\n");
    assert_eq!(second_ctl.next_write().await, "b; echo __DONE__\n");

    second_ctl.emit("from b\n__DONE__\n");
    assert_eq!(b.await, CommandOutcome::Completed("from b".into()));
    assert_eq!(first.status(), SessionStatus::Busy);

    first_ctl.emit("from a\n__DONE__\n");
    assert_eq!(a.await, CommandOutcome::Completed("from a".into()));

    first.close().await;
    second.close().await;
}
