//! Bindings to the extension and page APIs the recorder uses.

use js_sys::{Object, Promise, Reflect};
use serde::Serialize;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = ["chrome", "tabs"], js_name = query)]
    pub fn tabs_query(query: &JsValue) -> Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "tabs"], js_name = update)]
    pub fn tabs_update(tab_id: i32, properties: &JsValue) -> Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "tabs", "onRemoved"], js_name = addListener)]
    pub fn tabs_on_removed_add_listener(cb: &Closure<dyn FnMut(JsValue, JsValue)>);

    #[wasm_bindgen(catch, js_namespace = ["chrome", "tabCapture"], js_name = getMediaStreamId)]
    pub fn tab_capture_get_media_stream_id(options: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime"], js_name = sendMessage)]
    pub fn runtime_send_message(message: &JsValue) -> Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime", "onMessage"], js_name = addListener)]
    pub fn runtime_on_message_add_listener(cb: &Closure<dyn FnMut(JsValue, JsValue, JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "runtime", "onInstalled"], js_name = addListener)]
    pub fn runtime_on_installed_add_listener(cb: &Closure<dyn FnMut(JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "contextMenus"], js_name = create)]
    pub fn context_menus_create(properties: &JsValue);

    #[wasm_bindgen(js_namespace = ["chrome", "contextMenus", "onClicked"], js_name = addListener)]
    pub fn context_menus_on_clicked_add_listener(cb: &Closure<dyn FnMut(JsValue, JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "commands", "onCommand"], js_name = addListener)]
    pub fn commands_on_command_add_listener(cb: &Closure<dyn FnMut(JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "storage", "local"], js_name = get)]
    pub fn storage_local_get(keys: &JsValue) -> Promise;

    #[wasm_bindgen(catch, js_name = showSaveFilePicker)]
    pub fn show_save_file_picker(options: &JsValue) -> Result<Promise, JsValue>;

    /// `FileSystemFileHandle` returned by the save dialog.
    pub type FileHandle;

    #[wasm_bindgen(method, catch, js_name = createWritable)]
    pub fn create_writable(this: &FileHandle) -> Result<Promise, JsValue>;

    /// `FileSystemWritableFileStream` opened on a [`FileHandle`].
    pub type WritableFile;

    #[wasm_bindgen(method, catch)]
    pub fn write(this: &WritableFile, data: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch)]
    pub fn close(this: &WritableFile) -> Result<Promise, JsValue>;
}

/// Serializes into plain JS objects (not `Map`s), which is what the Chrome APIs expect.
pub fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(Into::into)
}

/// Reads `obj[key]` as an integer tab id.
pub fn get_i32(obj: &JsValue, key: &str) -> Option<i32> {
    Reflect::get(obj, &JsValue::from_str(key))
        .ok()
        .and_then(|v| v.as_f64())
        .map(|v| v as i32)
}

pub fn get_string(obj: &JsValue, key: &str) -> Option<String> {
    Reflect::get(obj, &JsValue::from_str(key))
        .ok()
        .and_then(|v| v.as_string())
}

pub fn build_object(entries: &[(&str, JsValue)]) -> Result<JsValue, JsValue> {
    let obj = Object::new();
    for (key, value) in entries {
        Reflect::set(&obj, &JsValue::from_str(key), value)?;
    }
    Ok(obj.into())
}

/// Flattens a thrown JS value into a message.
pub fn stringify_js_error(err: JsValue) -> String {
    if let Some(message) = get_string(&err, "message") {
        let name = get_string(&err, "name").unwrap_or_default();
        return if name.is_empty() || message.starts_with(&name) {
            message
        } else {
            format!("{name}: {message}")
        };
    }
    err.as_string()
        .or_else(|| js_sys::JSON::stringify(&err).ok()?.as_string())
        .unwrap_or_else(|| format!("{:?}", err))
}

/// Returns true for the `AbortError` the save dialog throws when dismissed.
pub fn is_abort_error(err: &JsValue) -> bool {
    get_string(err, "name").as_deref() == Some("AbortError")
}
