//! Extension page hosting the tab recorder.
//!
//! Loads settings, starts the dispatcher, and wires the extension events
//! (runtime messages, tab removal, context menu, keyboard commands) to it.

mod chrome;
mod host;
mod logging;

use std::cell::RefCell;

use serde_json::json;
use tabrec::{DispatchHandle, Dispatcher, RecorderSettings, SETTINGS_STORAGE_KEY, TargetId};
use tabrec_protocol::ControlMessage;
use tracing::{debug, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, spawn_local};

use crate::host::ChromeHost;

thread_local! {
    static HANDLE: RefCell<Option<DispatchHandle>> = const { RefCell::new(None) };
}

/// Context menu entries, keyed by the control message they send.
const MENU_ITEMS: [(&str, &str); 2] = [("start", "Start recording"), ("stop", "Stop recording")];

#[wasm_bindgen(start)]
pub async fn start() {
    console_error_panic_hook::set_once();
    logging::init_logging();

    let settings = load_settings().await;
    debug!(target = "tabrec.ext", ?settings, "settings loaded");

    let (dispatcher, handle) = Dispatcher::new(ChromeHost, settings);
    HANDLE.with(|h| *h.borrow_mut() = Some(handle));
    spawn_local(dispatcher.run());

    install_listeners();
    info!(target = "tabrec.ext", "recorder ready");
}

async fn load_settings() -> RecorderSettings {
    let stored = match JsFuture::from(chrome::storage_local_get(&JsValue::from_str(SETTINGS_STORAGE_KEY))).await {
        Ok(items) => js_sys::Reflect::get(&items, &JsValue::from_str(SETTINGS_STORAGE_KEY)).ok(),
        Err(err) => {
            warn!(target = "tabrec.ext", error = %chrome::stringify_js_error(err), "settings unavailable");
            None
        }
    };
    let value = stored
        .filter(|v| !v.is_undefined())
        .and_then(|v| serde_wasm_bindgen::from_value::<serde_json::Value>(v).ok());
    RecorderSettings::from_stored(value)
}

fn with_handle(f: impl FnOnce(&DispatchHandle) -> bool) {
    let sent = HANDLE.with(|h| h.borrow().as_ref().map(f));
    if sent != Some(true) {
        debug!(target = "tabrec.ext", "input not delivered");
    }
}

fn install_listeners() {
    {
        let on_message = Closure::<dyn FnMut(JsValue, JsValue, JsValue)>::new(|message: JsValue, _sender, _respond| {
            if let Ok(value) = serde_wasm_bindgen::from_value::<serde_json::Value>(message) {
                with_handle(|h| h.control_json(value));
            }
        });
        chrome::runtime_on_message_add_listener(&on_message);
        on_message.forget();
    }

    {
        let on_removed = Closure::<dyn FnMut(JsValue, JsValue)>::new(|tab_id: JsValue, _info| {
            if let Some(tab_id) = tab_id.as_f64() {
                with_handle(|h| h.target_removed(tab_id as TargetId));
            }
        });
        chrome::tabs_on_removed_add_listener(&on_removed);
        on_removed.forget();
    }

    {
        let on_installed = Closure::<dyn FnMut(JsValue)>::new(|_details| {
            for (id, title) in MENU_ITEMS {
                match chrome::to_js(&json!({"id": id, "title": title, "contexts": ["page"]})) {
                    Ok(props) => chrome::context_menus_create(&props),
                    Err(err) => warn!(target = "tabrec.ext", menu = id, error = %chrome::stringify_js_error(err), "menu not created"),
                }
            }
        });
        chrome::runtime_on_installed_add_listener(&on_installed);
        on_installed.forget();
    }

    {
        let on_clicked = Closure::<dyn FnMut(JsValue, JsValue)>::new(|info: JsValue, _tab| {
            if let Some(item) = chrome::get_string(&info, "menuItemId") {
                spawn_local(control_active_tab(item));
            }
        });
        chrome::context_menus_on_clicked_add_listener(&on_clicked);
        on_clicked.forget();
    }

    {
        let on_command = Closure::<dyn FnMut(JsValue)>::new(|command: JsValue| {
            if let Some(command) = command.as_string() {
                spawn_local(control_active_tab(command));
            }
        });
        chrome::commands_on_command_add_listener(&on_command);
        on_command.forget();
    }
}

/// Sends `start` or `stop` for the focused tab. Anything else counts as `stop`.
async fn control_active_tab(action: String) {
    let tab_id = match find_active_tab().await {
        Ok(tab_id) => tab_id,
        Err(err) => {
            warn!(target = "tabrec.ext", %action, error = %chrome::stringify_js_error(err), "no active tab");
            return;
        }
    };
    debug!(target = "tabrec.ext", %action, tab = tab_id, "shortcut");
    let message = match action.as_str() {
        "start" => ControlMessage::Start { tab_id },
        _ => ControlMessage::Stop { tab_id },
    };
    with_handle(|h| h.control(message));
}

async fn find_active_tab() -> Result<TargetId, JsValue> {
    let query = chrome::to_js(&json!({"active": true, "currentWindow": true}))?;
    let tabs = js_sys::Array::from(&JsFuture::from(chrome::tabs_query(&query)).await?);
    chrome::get_i32(&tabs.get(0), "id").ok_or_else(|| JsValue::from_str("no tab id"))
}
