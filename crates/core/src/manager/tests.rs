use tabrec_protocol::{ControlMessage, Notification, StatusColor};

use crate::TargetId;
use crate::config::FALLBACK_MIME_TYPE;
use crate::dispatch::{DispatchHandle, Dispatcher};
use crate::error::RecorderError;
use crate::host::CaptureSource;
use crate::settings::RecorderSettings;
use crate::state::SessionState;
use crate::testing::{FakeBehavior, FakeHost};

use super::SessionManager;

/// Reserves `target` and applies its acquisition right away.
async fn start_now(manager: &mut SessionManager<FakeHost>, target: TargetId) -> crate::error::Result<()> {
	let acquisition = manager.start(target)?;
	manager.complete_start(acquisition.await).await
}

fn setup(configure: impl FnOnce(&mut FakeBehavior)) -> (FakeHost, Dispatcher<FakeHost>, DispatchHandle) {
	setup_with_settings(configure, RecorderSettings::default())
}

fn setup_with_settings(
	configure: impl FnOnce(&mut FakeBehavior),
	settings: RecorderSettings,
) -> (FakeHost, Dispatcher<FakeHost>, DispatchHandle) {
	let host = FakeHost::new().with(configure);
	let (dispatcher, handle) = Dispatcher::new(host.clone(), settings);
	(host, dispatcher, handle)
}

fn red(text: &str) -> Notification {
	Notification::status(text, StatusColor::Red)
}

#[tokio::test]
async fn second_start_for_same_tab_is_rejected() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;
	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	assert_eq!(dispatcher.manager().len(), 1);
	assert_eq!(host.streams_started(), 1);
	assert_eq!(host.save_requests().len(), 1);
	assert_eq!(
		host.statuses(),
		vec![
			Notification::status("Recording tab 1", StatusColor::Green),
			red("Tab 1 is already being recorded"),
		]
	);
}

#[tokio::test]
async fn start_while_first_is_still_acquiring_is_rejected() {
	let (host, mut dispatcher, handle) = setup(|_| {});
	let gate = host.hold_dialogs();

	handle.control(ControlMessage::Start { tab_id: 1 });
	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().state(1), SessionState::Starting);
	assert_eq!(host.statuses(), vec![red("Tab 1 is already being recorded")]);

	gate.open();
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().state(1), SessionState::Active);
	assert_eq!(host.save_requests().len(), 1);
}

#[tokio::test]
async fn stop_releases_everything_and_removes_entry() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Start { tab_id: 4 });
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().state(4), SessionState::Active);
	assert_eq!(host.encoder_timeslice(0), Some(1000));

	handle.control(ControlMessage::Stop { tab_id: 4 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.stream_stop_calls(0), 1);
	assert!(host.file(0).closed);
	assert_eq!(host.encoder_stop_calls(0), 1);
}

#[tokio::test]
async fn chunks_land_in_file_in_emission_order() {
	let (host, mut dispatcher, handle) = setup(|b| b.final_chunk = Some(b"-tail".to_vec()));

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	let events = host.session_events(0);
	for chunk in [&b"one"[..], b"-two", b"-three"] {
		events.chunk(chunk.to_vec());
	}
	handle.control(ControlMessage::Stop { tab_id: 1 });
	dispatcher.drain().await;

	let file = host.file(0);
	assert_eq!(file.bytes, b"one-two-three-tail");
	assert_eq!(file.writes, 4);
	assert!(file.closed);
}

#[tokio::test]
async fn chunks_before_stop_signal_are_written_while_finalizing() {
	let (host, mut dispatcher, handle) = setup(|b| b.stop_signals = false);

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;
	handle.control(ControlMessage::Stop { tab_id: 1 });
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().state(1), SessionState::Finalizing);

	let events = host.session_events(0);
	events.chunk(b"late".to_vec());
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().summary(1).map(|s| s.bytes_written), Some(4));

	events.stopped();
	events.chunk(b"after".to_vec());
	events.stopped();
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.file(0).bytes, b"late");
	assert_eq!(host.stream_stop_calls(0), 1);
}

#[tokio::test]
async fn write_failure_stops_the_session() {
	let (host, mut dispatcher, handle) = setup(|b| b.fail_write_after = Some(1));

	handle.control(ControlMessage::Start { tab_id: 6 });
	dispatcher.drain().await;

	let events = host.session_events(0);
	events.chunk(b"ok".to_vec());
	events.chunk(b"boom".to_vec());
	events.chunk(b"dropped".to_vec());
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.file(0).bytes, b"ok");
	assert!(host.file(0).closed);
	assert_eq!(host.stream_stop_calls(0), 1);
	assert_eq!(host.encoder_stop_calls(0), 1);
	assert_eq!(
		host.statuses().last(),
		Some(&red("Recording failed: write failed: QuotaExceededError"))
	);
}

#[tokio::test]
async fn removing_recorded_tab_stops_it() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Start { tab_id: 8 });
	dispatcher.drain().await;
	handle.target_removed(8);
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert!(host.all_streams_stopped());
	assert!(host.all_writers_closed());
}

#[tokio::test]
async fn stop_without_session_is_rejected() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Stop { tab_id: 3 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.statuses(), vec![red("Tab 3 has no recording in progress")]);
	assert_eq!(host.encoders_created(), 0);
}

#[tokio::test]
async fn manager_returns_typed_errors() {
	let host = FakeHost::new();
	let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
	let mut manager = SessionManager::new(host.clone(), RecorderSettings::default(), tx);

	assert_eq!(manager.stop(3).await, Err(RecorderError::NotRecording(3)));
	let acquisition = manager.start(3).expect("tab 3 is free");
	assert_eq!(manager.state(3), SessionState::Starting);
	assert_eq!(manager.start(3).err(), Some(RecorderError::AlreadyRecording(3)));
	assert_eq!(manager.complete_start(acquisition.await).await, Ok(()));
	assert_eq!(manager.state(3), SessionState::Active);
	assert_eq!(manager.targets(), vec![3]);

	let host = FakeHost::new().with(|b| b.cancel_choice = true);
	let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
	let mut manager = SessionManager::new(host, RecorderSettings::default(), tx);
	assert_eq!(start_now(&mut manager, 4).await, Err(RecorderError::UserCancelledFileChoice));
	assert!(manager.is_empty());
}

#[tokio::test]
async fn file_open_failure_stops_stream_before_returning() {
	let (host, mut dispatcher, handle) = setup(|b| b.open_error = Some("NotAllowedError".into()));

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.streams_started(), 1);
	assert_eq!(host.stream_stop_calls(0), 1);
	assert_eq!(host.encoders_created(), 0);
	assert_eq!(
		host.statuses(),
		vec![red("Recording failed: could not open output file: NotAllowedError")]
	);
}

#[tokio::test]
async fn picker_failure_is_a_file_open_failure() {
	let (host, mut dispatcher, handle) = setup(|b| b.choose_error = Some("SecurityError".into()));

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.streams_started(), 0);
	assert_eq!(
		host.statuses(),
		vec![red("Recording failed: could not open output file: SecurityError")]
	);
}

#[tokio::test]
async fn cancelled_file_choice_aborts_silently() {
	let (host, mut dispatcher, handle) = setup(|b| b.cancel_choice = true);

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.streams_started(), 0);
	assert!(host.capture_sources().is_empty());
	assert!(host.notifications().is_empty());

	// The tab is free again.
	assert_eq!(dispatcher.manager().state(1), SessionState::Idle);
}

#[tokio::test]
async fn capture_failure_opens_no_writer() {
	let (host, mut dispatcher, handle) = setup(|b| b.capture_error = Some("Permission denied".into()));

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.files_opened(), 0);
	assert_eq!(
		host.statuses(),
		vec![red("Recording failed: capture failed: Permission denied")]
	);
}

#[tokio::test]
async fn encoder_start_failure_releases_stream_and_writer() {
	let (host, mut dispatcher, handle) = setup(|b| b.start_encoder_error = Some("NotSupportedError".into()));

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.stream_stop_calls(0), 1);
	assert!(host.file(0).closed);
	assert_eq!(
		host.statuses(),
		vec![red("Recording failed: encoder failed to start: NotSupportedError")]
	);
}

#[tokio::test]
async fn encoder_creation_failure_releases_stream_and_writer() {
	let (host, mut dispatcher, handle) = setup(|b| b.create_encoder_error = Some("bad mime".into()));

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert!(host.all_streams_stopped());
	assert!(host.all_writers_closed());
}

#[tokio::test]
async fn close_failure_still_stops_tracks_and_removes_entry() {
	let (host, mut dispatcher, handle) = setup(|b| b.close_error = Some("InvalidStateError".into()));

	handle.control(ControlMessage::Start { tab_id: 1 });
	handle.control(ControlMessage::Stop { tab_id: 1 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.stream_stop_calls(0), 1);
	assert!(host.statuses().iter().all(|n| !matches!(
		n,
		Notification::Status {
			color: StatusColor::Red,
			..
		}
	)));
}

#[tokio::test]
async fn encoder_refusing_to_stop_releases_immediately() {
	let (host, mut dispatcher, handle) = setup(|b| b.stop_encoder_error = Some("InvalidStateError".into()));

	handle.control(ControlMessage::Start { tab_id: 1 });
	handle.control(ControlMessage::Stop { tab_id: 1 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.stream_stop_calls(0), 1);
	assert!(host.file(0).closed);
}

#[tokio::test]
async fn repeated_stop_while_finalizing_does_not_resignal_encoder() {
	let (host, mut dispatcher, handle) = setup(|b| b.stop_signals = false);

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;
	handle.control(ControlMessage::Stop { tab_id: 1 });
	handle.control(ControlMessage::Stop { tab_id: 1 });
	handle.target_removed(1);
	dispatcher.drain().await;

	assert_eq!(host.encoder_stop_calls(0), 1);
	assert_eq!(dispatcher.manager().state(1), SessionState::Finalizing);
}

#[tokio::test]
async fn status_sequence_follows_lifecycle() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Start { tab_id: 12 });
	handle.control(ControlMessage::Stop { tab_id: 12 });
	dispatcher.drain().await;

	assert_eq!(
		host.notifications(),
		vec![
			Notification::status("Recording tab 12", StatusColor::Green),
			Notification::status("Saving recording of tab 12...", StatusColor::Blue),
		]
	);
}

#[tokio::test]
async fn sessions_are_independent_per_tab() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Start { tab_id: 1 });
	handle.control(ControlMessage::Start { tab_id: 2 });
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().targets(), vec![1, 2]);

	host.session_events(0).chunk(b"a".to_vec());
	host.session_events(1).chunk(b"b".to_vec());
	handle.control(ControlMessage::Stop { tab_id: 1 });
	dispatcher.drain().await;

	assert_eq!(dispatcher.manager().targets(), vec![2]);
	assert_eq!(host.file(0).bytes, b"a");
	assert_eq!(host.file(1).bytes, b"b");
	assert!(host.file(0).closed);
	assert!(!host.file(1).closed);
	assert_eq!(host.stream_stop_calls(1), 0);
}

#[tokio::test]
async fn helper_tab_flow_uses_resolved_stream_and_closes_helper() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Loaded { tab_id: 5 });
	dispatcher.drain().await;

	assert_eq!(host.resolved_targets(), vec![5]);
	assert_eq!(
		host.capture_sources(),
		vec![CaptureSource::StreamId {
			target: 5,
			stream_id: "stream-5".to_string(),
		}]
	);

	handle.control(ControlMessage::Stop { tab_id: 5 });
	dispatcher.drain().await;

	assert_eq!(
		host.notifications().last(),
		Some(&Notification::CloseTempRecordTab { tab_id: 5 })
	);
}

#[tokio::test]
async fn helper_tab_is_kept_when_disabled() {
	let settings = RecorderSettings {
		close_helper_tab: false,
		..RecorderSettings::default()
	};
	let (host, mut dispatcher, handle) = setup_with_settings(|_| {}, settings);

	handle.control(ControlMessage::Loaded { tab_id: 5 });
	handle.control(ControlMessage::Stop { tab_id: 5 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert!(
		!host
			.notifications()
			.iter()
			.any(|n| matches!(n, Notification::CloseTempRecordTab { .. }))
	);
}

#[tokio::test]
async fn direct_sessions_never_ask_to_close_a_tab() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Start { tab_id: 5 });
	handle.control(ControlMessage::Stop { tab_id: 5 });
	dispatcher.drain().await;

	assert_eq!(host.capture_sources(), vec![CaptureSource::Tab(5)]);
	assert!(host.resolved_targets().is_empty());
	assert_eq!(host.notifications().len(), 2);
}

#[tokio::test]
async fn stream_id_failure_is_a_capture_failure() {
	let (host, mut dispatcher, handle) = setup(|b| b.resolve_error = Some("Cannot capture a tab with an active stream.".into()));

	handle.control(ControlMessage::Loaded { tab_id: 5 });
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.streams_started(), 0);
	assert_eq!(
		host.statuses(),
		vec![red("Recording failed: capture failed: Cannot capture a tab with an active stream.")]
	);
}

#[tokio::test]
async fn encoder_config_follows_device_profile() {
	let (host, mut dispatcher, handle) = setup(|b| {
		b.profile = crate::config::DeviceProfile::from_screen(Some(8.0), 1920.0, 1080.0, 2.0);
		b.supported_mimes = Some(vec![]);
	});

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	let config = host.encoder_configs()[0];
	assert_eq!((config.width, config.height), (4096, 2160));
	assert_eq!(config.mime_type, FALLBACK_MIME_TYPE);
	assert_eq!(dispatcher.manager().summary(1).and_then(|s| s.config), Some(config));
}

#[tokio::test]
async fn save_dialog_uses_start_time_and_settings() {
	let settings = RecorderSettings {
		timeslice_ms: 250,
		file_prefix: "lecture".to_string(),
		..RecorderSettings::default()
	};
	let (host, mut dispatcher, handle) = setup_with_settings(|_| {}, settings);
	host.set_now(1234);

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	assert_eq!(host.save_requests()[0].suggested_name, "lecture-1234.webm");
	assert_eq!(host.file(0).name, "lecture-1234.webm");
	assert_eq!(host.encoder_timeslice(0), Some(250));
	assert_eq!(dispatcher.manager().summary(1).and_then(|s| s.started_at_ms), Some(1234));
}

#[tokio::test]
async fn shutdown_releases_sessions_without_stop_signal() {
	let host = FakeHost::new().with(|b| b.stop_signals = false);
	let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
	let mut manager = SessionManager::new(host.clone(), RecorderSettings::default(), tx);

	start_now(&mut manager, 1).await.unwrap();
	start_now(&mut manager, 2).await.unwrap();
	manager.shutdown().await;

	assert!(manager.is_empty());
	assert!(host.all_streams_stopped());
	assert!(host.all_writers_closed());
}

#[tokio::test]
async fn restart_after_release_is_allowed() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Start { tab_id: 1 });
	handle.control(ControlMessage::Stop { tab_id: 1 });
	dispatcher.drain().await;
	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	assert_eq!(dispatcher.manager().state(1), SessionState::Active);
	assert_eq!(host.streams_started(), 2);
	assert_eq!(host.stream_stop_calls(0), 1);
}

#[tokio::test]
async fn shutdown_during_acquisition_releases_late_resources_quietly() {
	let host = FakeHost::new();
	let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
	let mut manager = SessionManager::new(host.clone(), RecorderSettings::default(), tx);

	let acquisition = manager.start(1).expect("tab 1 is free");
	manager.shutdown().await;
	assert!(manager.is_empty());

	assert_eq!(manager.complete_start(acquisition.await).await, Ok(()));
	assert!(manager.is_empty());
	assert_eq!(host.streams_started(), 1);
	assert!(host.all_streams_stopped());
	assert!(host.all_writers_closed());
	assert!(host.notifications().is_empty());
}

#[tokio::test]
async fn events_from_a_released_encoder_do_not_reach_the_next_session() {
	let (host, mut dispatcher, handle) = setup(|b| b.stop_encoder_error = Some("InvalidStateError".into()));

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;
	handle.control(ControlMessage::Stop { tab_id: 1 });
	dispatcher.drain().await;
	assert!(dispatcher.manager().is_empty());

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().state(1), SessionState::Active);

	let old = host.session_events(0);
	old.chunk(b"OLD".to_vec());
	old.stopped();
	dispatcher.drain().await;

	assert_eq!(dispatcher.manager().state(1), SessionState::Active);
	assert!(host.file(1).bytes.is_empty());
	assert!(!host.file(1).closed);
	assert_eq!(host.stream_stop_calls(1), 0);

	host.session_events(1).chunk(b"new".to_vec());
	dispatcher.drain().await;
	assert_eq!(host.file(1).bytes, b"new");
}

#[tokio::test]
async fn pending_save_dialog_does_not_block_other_tabs() {
	let (host, mut dispatcher, handle) = setup(|_| {});

	handle.control(ControlMessage::Start { tab_id: 1 });
	dispatcher.drain().await;

	let gate = host.hold_dialogs();
	handle.control(ControlMessage::Start { tab_id: 2 });
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().state(2), SessionState::Starting);
	assert_eq!(dispatcher.pending_starts(), 1);
	assert_eq!(host.save_requests().len(), 2);

	host.session_events(0).chunk(b"live".to_vec());
	handle.target_removed(1);
	dispatcher.drain().await;

	assert_eq!(host.file(0).bytes, b"live");
	assert!(host.file(0).closed);
	assert_eq!(host.stream_stop_calls(0), 1);
	assert_eq!(dispatcher.manager().targets(), vec![2]);

	gate.open();
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().state(2), SessionState::Active);
	assert_eq!(dispatcher.pending_starts(), 0);
	assert_eq!(host.files_opened(), 2);
}

#[tokio::test]
async fn stop_during_save_dialog_is_applied_once_started() {
	let (host, mut dispatcher, handle) = setup(|_| {});
	let gate = host.hold_dialogs();

	handle.control(ControlMessage::Start { tab_id: 3 });
	dispatcher.drain().await;
	handle.control(ControlMessage::Stop { tab_id: 3 });
	dispatcher.drain().await;
	assert_eq!(dispatcher.manager().state(3), SessionState::Starting);
	assert_eq!(host.encoders_created(), 0);
	assert!(host.statuses().is_empty());

	gate.open();
	dispatcher.drain().await;

	assert!(dispatcher.manager().is_empty());
	assert_eq!(host.encoder_stop_calls(0), 1);
	assert!(host.all_streams_stopped());
	assert!(host.all_writers_closed());
	assert_eq!(
		host.statuses(),
		vec![
			Notification::status("Recording tab 3", StatusColor::Green),
			Notification::status("Saving recording of tab 3...", StatusColor::Blue),
		]
	);
}

#[tokio::test]
async fn run_keeps_serving_while_a_dialog_is_open() {
	let (host, dispatcher, handle) = setup(|_| {});
	let gate = host.hold_dialogs();

	handle.control(ControlMessage::Start { tab_id: 1 });
	let run = tokio::spawn(async move {
		tokio::task::yield_now().await;
		handle.target_removed(1);
		gate.open();
		handle.shutdown();
	});
	dispatcher.run().await;
	run.await.unwrap();

	assert_eq!(host.streams_started(), 1);
	assert!(host.all_streams_stopped());
	assert!(host.all_writers_closed());
}

#[tokio::test]
async fn shutdown_releases_sessions_whose_encoder_refuses_to_stop() {
	let host = FakeHost::new().with(|b| b.stop_encoder_error = Some("InvalidStateError".into()));
	let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
	let mut manager = SessionManager::new(host.clone(), RecorderSettings::default(), tx);

	start_now(&mut manager, 1).await.unwrap();
	manager.shutdown().await;

	assert!(manager.is_empty());
	assert_eq!(host.encoder_stop_calls(0), 1);
	assert!(host.all_streams_stopped());
	assert!(host.all_writers_closed());
}
