//! [`Host`] implementation over the browser APIs.

use async_trait::async_trait;
use js_sys::{Array, Uint8Array};
use serde_json::json;
use tabrec::{
    CaptureSource, CaptureStream, DeviceProfile, Encoder, EncoderConfig, Host, HostError, HostResult,
    OutputWriter, SaveRequest, SessionEvents, TargetId,
};
use tabrec_protocol::Notification;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, spawn_local};
use web_sys::{BlobEvent, MediaRecorder, MediaRecorderOptions, MediaStream, MediaStreamConstraints, MediaStreamTrack};

use crate::chrome::{self, FileHandle, WritableFile};

fn host_error(err: JsValue) -> HostError {
    HostError::new(chrome::stringify_js_error(err))
}

async fn await_promise(promise: Result<js_sys::Promise, JsValue>) -> HostResult<JsValue> {
    JsFuture::from(promise.map_err(host_error)?).await.map_err(host_error)
}

/// Browser-backed host. Runs in an extension page, where the save dialog and
/// `MediaRecorder` are available.
#[derive(Debug, Clone, Default)]
pub struct ChromeHost;

impl ChromeHost {
    fn window() -> HostResult<web_sys::Window> {
        web_sys::window().ok_or_else(|| HostError::new("no window in this context"))
    }

    async fn user_media(stream_id: &str, config: &EncoderConfig) -> HostResult<MediaStream> {
        let constraints = chrome::to_js(&json!({
            "audio": {
                "mandatory": {
                    "chromeMediaSource": "tab",
                    "chromeMediaSourceId": stream_id,
                }
            },
            "video": {
                "mandatory": {
                    "chromeMediaSource": "tab",
                    "chromeMediaSourceId": stream_id,
                    "width": { "ideal": config.width },
                    "height": { "ideal": config.height },
                    "frameRate": { "ideal": config.frame_rate },
                }
            }
        }))
        .map_err(host_error)?;

        let devices = Self::window()?.navigator().media_devices().map_err(host_error)?;
        let stream = await_promise(
            devices.get_user_media_with_constraints(constraints.unchecked_ref::<MediaStreamConstraints>()),
        )
        .await?;
        Ok(stream.unchecked_into())
    }
}

#[async_trait(?Send)]
impl Host for ChromeHost {
    type Destination = FileHandle;
    type Stream = TabStream;
    type Writer = FileWriter;
    type Encoder = TabEncoder;

    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }

    fn device_profile(&self) -> DeviceProfile {
        let Ok(window) = Self::window() else {
            return DeviceProfile::from_screen(None, 0.0, 0.0, 1.0);
        };
        // Not in web-sys; Chromium only.
        let memory = js_sys::Reflect::get(&window.navigator(), &JsValue::from_str("deviceMemory"))
            .ok()
            .and_then(|v| v.as_f64());
        let (width, height) = window
            .screen()
            .map(|s| (s.width().unwrap_or(0), s.height().unwrap_or(0)))
            .unwrap_or((0, 0));
        DeviceProfile::from_screen(memory, width as f64, height as f64, window.device_pixel_ratio())
    }

    fn is_type_supported(&self, mime: &str) -> bool {
        MediaRecorder::is_type_supported(mime)
    }

    async fn choose_destination(&self, request: &SaveRequest) -> HostResult<Option<FileHandle>> {
        let mut accept = serde_json::Map::new();
        accept.insert(request.mime.clone(), json!([request.extension]));
        let options = chrome::to_js(&json!({
            "suggestedName": request.suggested_name,
            "types": [{
                "description": request.description,
                "accept": accept,
            }],
        }))
        .map_err(host_error)?;

        let promise = chrome::show_save_file_picker(&options).map_err(host_error)?;
        match JsFuture::from(promise).await {
            Ok(handle) => Ok(Some(handle.unchecked_into())),
            Err(err) if chrome::is_abort_error(&err) => Ok(None),
            Err(err) => Err(host_error(err)),
        }
    }

    async fn resolve_stream_id(&self, target: TargetId) -> HostResult<String> {
        let options = chrome::build_object(&[("targetTabId", JsValue::from_f64(target as f64))]).map_err(host_error)?;
        await_promise(chrome::tab_capture_get_media_stream_id(&options))
            .await?
            .as_string()
            .ok_or_else(|| HostError::new(format!("no stream id for tab {target}")))
    }

    async fn acquire_stream(&self, source: &CaptureSource, config: &EncoderConfig) -> HostResult<TabStream> {
        let stream_id = match source {
            CaptureSource::Tab(target) => self.resolve_stream_id(*target).await?,
            CaptureSource::StreamId { target, stream_id } => {
                // The helper tab has focus; capture needs the recorded tab in front.
                let props = chrome::build_object(&[("active", JsValue::TRUE)]).map_err(host_error)?;
                if let Err(err) = JsFuture::from(chrome::tabs_update(*target, &props)).await {
                    warn!(target = "tabrec.host", tab = target, error = %chrome::stringify_js_error(err), "could not activate tab");
                }
                stream_id.clone()
            }
        };

        let stream = Self::user_media(&stream_id, config).await?;
        debug!(target = "tabrec.host", tab = source.target(), tracks = stream.get_tracks().length(), "stream acquired");
        Ok(TabStream { stream })
    }

    async fn open_writer(&self, destination: FileHandle) -> HostResult<FileWriter> {
        let writable = await_promise(destination.create_writable()).await?;
        Ok(FileWriter {
            file: writable.unchecked_into(),
        })
    }

    fn create_encoder(&self, stream: &TabStream, config: &EncoderConfig, events: SessionEvents) -> HostResult<TabEncoder> {
        TabEncoder::new(&stream.stream, config, events)
    }

    fn notify(&self, notification: Notification) {
        let message = match chrome::to_js(&notification) {
            Ok(message) => message,
            Err(err) => {
                warn!(target = "tabrec.host", error = %chrome::stringify_js_error(err), "unserializable notification");
                return;
            }
        };
        let promise = chrome::runtime_send_message(&message);
        spawn_local(async move {
            // Rejects when no surface is listening, e.g. the popup is closed.
            let _ = JsFuture::from(promise).await;
        });
    }
}

pub struct TabStream {
    stream: MediaStream,
}

impl CaptureStream for TabStream {
    fn stop_tracks(&mut self) {
        let tracks: Array = self.stream.get_tracks();
        for track in tracks.iter() {
            track.unchecked_into::<MediaStreamTrack>().stop();
        }
    }
}

pub struct FileWriter {
    file: WritableFile,
}

#[async_trait(?Send)]
impl OutputWriter for FileWriter {
    async fn write(&mut self, chunk: &[u8]) -> HostResult<()> {
        let data = Uint8Array::from(chunk);
        await_promise(self.file.write(&data)).await.map(drop)
    }

    async fn close(&mut self) -> HostResult<()> {
        await_promise(self.file.close()).await.map(drop)
    }
}

enum Output {
    Data(web_sys::Blob),
    Stopped,
}

/// `MediaRecorder` bound to one session.
///
/// Blob-to-bytes conversion is asynchronous, so every event is funnelled
/// through a local queue and forwarded in arrival order; the stop signal is
/// only forwarded once every chunk before it has been.
pub struct TabEncoder {
    recorder: MediaRecorder,
    _on_data: Closure<dyn FnMut(BlobEvent)>,
    _on_stop: Closure<dyn FnMut(JsValue)>,
}

impl TabEncoder {
    fn new(stream: &MediaStream, config: &EncoderConfig, events: SessionEvents) -> HostResult<Self> {
        let options = MediaRecorderOptions::new();
        options.set_mime_type(config.mime_type);
        options.set_audio_bits_per_second(config.audio_bits_per_second);
        options.set_video_bits_per_second(config.video_bits_per_second);
        let recorder =
            MediaRecorder::new_with_media_stream_and_media_recorder_options(stream, &options).map_err(host_error)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Output>();
        spawn_local(async move {
            while let Some(output) = rx.recv().await {
                match output {
                    Output::Data(blob) => match JsFuture::from(blob.array_buffer()).await {
                        Ok(buffer) => events.chunk(Uint8Array::new(&buffer).to_vec()),
                        Err(err) => {
                            warn!(target = "tabrec.host", tab = events.target(), error = %chrome::stringify_js_error(err), "unreadable chunk dropped")
                        }
                    },
                    Output::Stopped => {
                        events.stopped();
                        break;
                    }
                }
            }
        });

        let data_tx = tx.clone();
        let on_data = Closure::<dyn FnMut(BlobEvent)>::new(move |event: BlobEvent| {
            if let Some(blob) = event.data() {
                let _ = data_tx.send(Output::Data(blob));
            }
        });
        recorder.set_ondataavailable(Some(on_data.as_ref().unchecked_ref()));

        let on_stop = Closure::<dyn FnMut(JsValue)>::new(move |_| {
            let _ = tx.send(Output::Stopped);
        });
        recorder.set_onstop(Some(on_stop.as_ref().unchecked_ref()));

        Ok(Self {
            recorder,
            _on_data: on_data,
            _on_stop: on_stop,
        })
    }
}

impl Encoder for TabEncoder {
    fn start(&mut self, timeslice_ms: u32) -> HostResult<()> {
        self.recorder
            .start_with_time_slice(timeslice_ms.min(i32::MAX as u32) as i32)
            .map_err(host_error)
    }

    fn stop(&mut self) -> HostResult<()> {
        self.recorder.stop().map_err(host_error)
    }
}

impl Drop for TabEncoder {
    fn drop(&mut self) {
        // The closures die with this value; detach them first.
        self.recorder.set_ondataavailable(None);
        self.recorder.set_onstop(None);
    }
}
