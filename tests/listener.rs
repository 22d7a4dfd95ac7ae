//! Speech recognition and audio arbitration integration tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use spectra_speech::arbiter::{AcquireRequest, OwnerId};
use spectra_speech::stt::{RecognitionEvent, SessionState, listen_with_retry};
use spectra_speech::{AudioMode, Error, ListenCallbacks, Priority};

mod common;
use common::{FakePlayback, FakeSynthesis, Harness, ScriptedEngine, final_transcript, partial};

fn ignore_partial(_: String) {}

#[tokio::test(start_paused = true)]
async fn test_deadline_without_result_stops_silently() {
    let h = Harness::standard();
    let listener = h.speech.listener();
    let finals = Arc::new(AtomicBool::new(false));

    let seen = finals.clone();
    let started = tokio::time::Instant::now();
    let handle = listener
        .listen(
            ListenCallbacks::new(ignore_partial, move |_| seen.store(true, Ordering::SeqCst)),
            Some(Duration::from_secs(2)),
        )
        .unwrap();
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Recording);

    assert!(listener.stop_at_deadline(&handle).await);

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(handle.is_expired());
    assert!(!finals.load(Ordering::SeqCst));
    assert_eq!(listener.state(), SessionState::Stopped);
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);
}

#[tokio::test]
async fn test_partials_then_final() {
    let h = Harness::new(
        FakeSynthesis::new(),
        FakePlayback::new(Duration::from_millis(10)),
        ScriptedEngine::new(vec![vec![
            partial("turn"),
            partial("turn on the"),
            final_transcript("turn on the lights"),
        ]]),
    );
    let listener = h.speech.listener();

    let partials = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = oneshot::channel();
    let collected = partials.clone();
    listener
        .listen(
            ListenCallbacks::new(
                move |text| collected.lock().unwrap().push(text),
                move |text| {
                    let _ = tx.send(text);
                },
            ),
            None,
        )
        .unwrap();

    assert_eq!(rx.await.unwrap(), "turn on the lights");
    assert_eq!(*partials.lock().unwrap(), vec!["turn", "turn on the"]);
    assert_eq!(listener.state(), SessionState::Stopped);
    assert_eq!(listener.session().restart_count, 0);
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);
}

#[tokio::test]
async fn test_stop_delivers_last_partial() {
    let h = Harness::new(
        FakeSynthesis::new(),
        FakePlayback::new(Duration::from_millis(10)),
        ScriptedEngine::silent(),
    );
    let listener = h.speech.listener();

    let (partial_tx, mut partial_rx) = tokio::sync::mpsc::unbounded_channel();
    let (tx, rx) = oneshot::channel();
    let handle = listener
        .listen(
            ListenCallbacks::new(
                move |text| {
                    let _ = partial_tx.send(text);
                },
                move |text| {
                    let _ = tx.send(text);
                },
            ),
            None,
        )
        .unwrap();

    h.engine.emit(partial("what time"));
    assert_eq!(partial_rx.recv().await.unwrap(), "what time");

    assert!(listener.stop(&handle));
    assert!(!listener.stop(&handle));
    assert_eq!(rx.await.unwrap(), "what time");
}

#[tokio::test]
async fn test_recognizer_error_skips_final() {
    let h = Harness::new(
        FakeSynthesis::new(),
        FakePlayback::new(Duration::from_millis(10)),
        ScriptedEngine::new(vec![vec![RecognitionEvent::Error("no match".to_string())]]),
    );
    let listener = h.speech.listener();

    let finals = Arc::new(AtomicBool::new(false));
    let seen = finals.clone();
    let (tx, rx) = oneshot::channel();
    listener
        .listen(
            ListenCallbacks::new(ignore_partial, move |_| seen.store(true, Ordering::SeqCst))
                .on_error(move |e| {
                    let _ = tx.send(e);
                }),
            None,
        )
        .unwrap();

    assert_eq!(rx.await.unwrap(), Error::Recognition("no match".to_string()));
    assert!(!finals.load(Ordering::SeqCst));
    assert_eq!(listener.state(), SessionState::Stopped);
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);
}

#[tokio::test]
async fn test_missing_microphone_reaches_on_error() {
    let h = Harness::new(
        FakeSynthesis::new(),
        FakePlayback::new(Duration::from_millis(10)),
        ScriptedEngine::new(vec![vec![RecognitionEvent::Unavailable(
            "no input device available".to_string(),
        )]]),
    );
    let listener = h.speech.listener();

    let (tx, rx) = oneshot::channel();
    listener
        .listen(
            ListenCallbacks::new(ignore_partial, |_| {}).on_error(move |e| {
                let _ = tx.send(e);
            }),
            None,
        )
        .unwrap();

    assert_eq!(
        rx.await.unwrap(),
        Error::AudioUnavailable("no input device available".to_string())
    );
    assert_eq!(listener.state(), SessionState::Stopped);
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_final_after_stop_waits_for_running_partial() {
    let h = Harness::standard();
    let listener = h.speech.listener();

    let log = Arc::new(Mutex::new(Vec::new()));
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let partial_log = log.clone();
    let final_log = log.clone();
    let handle = listener
        .listen(
            ListenCallbacks::new(
                move |text| {
                    let _ = entered_tx.send(());
                    std::thread::sleep(Duration::from_millis(100));
                    partial_log.lock().unwrap().push(format!("partial:{text}"));
                },
                move |text| {
                    final_log.lock().unwrap().push(format!("final:{text}"));
                    let _ = done_tx.send(());
                },
            ),
            None,
        )
        .unwrap();

    h.engine.emit(partial("lights"));
    entered_rx.recv().await.unwrap();
    assert!(listener.stop(&handle));
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);

    done_rx.await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["partial:lights", "final:lights"]);
}

#[tokio::test(start_paused = true)]
async fn test_session_snapshot_is_listening_or_stopped() {
    let h = Harness::standard();
    let listener = h.speech.listener();
    assert_eq!(listener.session().state, SessionState::Stopped);

    let handle = listener
        .listen(ListenCallbacks::new(ignore_partial, |_| {}), Some(Duration::from_secs(2)))
        .unwrap();

    let snapshot = listener.session();
    assert_eq!(snapshot.state, SessionState::Listening);
    assert_eq!(snapshot.deadline, handle.deadline());

    assert!(listener.stop(&handle));
    let snapshot = listener.session();
    assert_eq!(snapshot.state, SessionState::Stopped);
    assert_eq!(snapshot.deadline, None);
}

#[tokio::test]
async fn test_new_session_replaces_old() {
    let h = Harness::standard();
    let listener = h.speech.listener();

    let first_final = Arc::new(AtomicBool::new(false));
    let seen = first_final.clone();
    listener
        .listen(
            ListenCallbacks::new(ignore_partial, move |_| seen.store(true, Ordering::SeqCst)),
            None,
        )
        .unwrap();
    let second = listener
        .listen(ListenCallbacks::new(ignore_partial, |_| {}), None)
        .unwrap();

    assert!(!first_final.load(Ordering::SeqCst));
    assert_eq!(h.engine.starts(), 2);
    assert_eq!(listener.state(), SessionState::Listening);
    assert_eq!(listener.session().restart_count, 1);
    assert_eq!(
        h.device.log(),
        vec!["on:recording", "off:recording", "on:recording"]
    );

    listener.stop(&second);
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);
}

#[tokio::test]
async fn test_listen_refused_while_protected_speech_holds_audio() {
    let h = Harness::standard();
    let _lease = h
        .speech
        .arbiter()
        .acquire(AcquireRequest::new(OwnerId::next(), AudioMode::Playing).protected(true))
        .unwrap();

    let result = h
        .speech
        .listener()
        .listen(ListenCallbacks::new(ignore_partial, |_| {}), None);

    assert!(matches!(result, Err(Error::ResourceBusy(_))));
    assert_eq!(h.speech.listener().state(), SessionState::Stopped);
    assert_eq!(h.engine.starts(), 0);
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_listen_interrupts_playback() {
    let h = Harness::new(
        FakeSynthesis::new(),
        FakePlayback::new(Duration::from_secs(5)),
        ScriptedEngine::silent(),
    );
    let synth = h.speech.synthesizer().clone();

    let speaking = tokio::spawn(async move { synth.speak("Hello", "V1", Priority::Normal).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Playing);

    let handle = h
        .speech
        .listener()
        .listen(ListenCallbacks::new(ignore_partial, |_| {}), None)
        .unwrap();

    assert!(matches!(speaking.await.unwrap(), Err(Error::AudioUnavailable(_))));
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Recording);
    assert_eq!(h.device.overlaps(), 0);
    assert_eq!(
        h.device.log(),
        vec!["on:playing", "off:playing", "on:recording"]
    );
    assert!(h.playback.played().is_empty());

    h.speech.listener().stop(&handle);
}

#[tokio::test(start_paused = true)]
async fn test_speak_revokes_listening() {
    let h = Harness::standard();
    let listener = h.speech.listener();

    let (tx, rx) = oneshot::channel();
    listener
        .listen(
            ListenCallbacks::new(ignore_partial, |_| {}).on_error(move |e| {
                let _ = tx.send(e);
            }),
            None,
        )
        .unwrap();

    h.speech
        .synthesizer()
        .speak("Hello", "V1", Priority::Normal)
        .await
        .unwrap();

    assert!(matches!(rx.await.unwrap(), Error::AudioUnavailable(_)));
    assert_eq!(listener.state(), SessionState::Stopped);
    assert_eq!(h.device.overlaps(), 0);
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_playback_failure_frees_audio_for_listening() {
    let h = Harness::new(
        FakeSynthesis::new(),
        FakePlayback::new(Duration::from_millis(10))
            .failing(Error::Decode("unsupported audio format".to_string())),
        ScriptedEngine::silent(),
    );

    let result = h
        .speech
        .synthesizer()
        .speak("Hello", "V1", Priority::Normal)
        .await;

    assert_eq!(result, Err(Error::Decode("unsupported audio format".to_string())));
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);
    assert_eq!(h.device.log(), vec!["on:playing", "off:playing"]);

    let handle = h
        .speech
        .listener()
        .listen(ListenCallbacks::new(ignore_partial, |_| {}), None)
        .unwrap();
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Recording);
    assert_eq!(h.device.overlaps(), 0);

    h.speech.listener().stop(&handle);
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_max_attempts() {
    let h = Harness::standard();
    let listener = h.speech.listener();

    let transcript = listen_with_retry(listener, ignore_partial, Duration::from_secs(2), 2)
        .await
        .unwrap();

    assert_eq!(transcript, None);
    assert_eq!(h.engine.starts(), 3);
    assert_eq!(listener.session().restart_count, 2);
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_retry_returns_transcript_from_later_attempt() {
    let h = Harness::new(
        FakeSynthesis::new(),
        FakePlayback::new(Duration::from_millis(10)),
        ScriptedEngine::new(vec![
            vec![],
            vec![RecognitionEvent::Error("network hiccup".to_string())],
            vec![final_transcript("yes")],
        ]),
    );
    let listener = h.speech.listener();

    let transcript = listen_with_retry(listener, ignore_partial, Duration::from_secs(2), 3)
        .await
        .unwrap();

    assert_eq!(transcript.as_deref(), Some("yes"));
    assert_eq!(h.engine.starts(), 3);
    assert_eq!(listener.session().restart_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_uses_partial_at_deadline() {
    let h = Harness::new(
        FakeSynthesis::new(),
        FakePlayback::new(Duration::from_millis(10)),
        ScriptedEngine::new(vec![vec![partial("maybe")]]),
    );

    let transcript =
        listen_with_retry(h.speech.listener(), ignore_partial, Duration::from_secs(2), 2)
            .await
            .unwrap();

    assert_eq!(transcript.as_deref(), Some("maybe"));
    assert_eq!(h.engine.starts(), 1);
}

#[tokio::test]
async fn test_retry_surfaces_unavailable_audio() {
    let h = Harness::standard();
    let _lease = h
        .speech
        .arbiter()
        .acquire(AcquireRequest::new(OwnerId::next(), AudioMode::Recording).protected(true))
        .unwrap();

    let result =
        listen_with_retry(h.speech.listener(), ignore_partial, Duration::from_secs(2), 2).await;

    assert!(matches!(result, Err(Error::ResourceBusy(_))));
    assert_eq!(h.engine.starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_when_microphone_is_missing() {
    let missing = || vec![RecognitionEvent::Unavailable("no input device available".to_string())];
    let h = Harness::new(
        FakeSynthesis::new(),
        FakePlayback::new(Duration::from_millis(10)),
        ScriptedEngine::new(vec![missing(), missing(), missing()]),
    );

    let result =
        listen_with_retry(h.speech.listener(), ignore_partial, Duration::from_secs(2), 2).await;

    assert!(matches!(result, Err(Error::AudioUnavailable(_))));
    assert_eq!(h.engine.starts(), 1);
    assert_eq!(h.speech.arbiter().mode(), AudioMode::Idle);
}
