//! C ABI for host shells (Swift, Kotlin). Declared in `include/pastelink.h`.
//!
//! A `PasteSession` owns its own tokio runtime and blocks the calling
//! thread for the duration of each call. Status-returning functions give
//! `0` on success and [`Error::code`](crate::Error::code) otherwise.
//! Strings handed out must be released with `free_string`, message arrays
//! with `webrtc_free_messages`.

use crate::config::PeerConfig;
use crate::peer::{Engine, RtcEngine};
use crate::session::SessionController;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::Arc;
use tracing::warn;

/// Null or non-UTF-8 argument.
pub const STATUS_BAD_ARGUMENT: c_int = -100;

pub struct PasteSession {
    runtime: tokio::runtime::Runtime,
    controller: SessionController,
}

fn status(result: crate::Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(err) => err.code(),
    }
}

unsafe fn text_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn into_c_string(text: &str) -> *mut c_char {
    match CString::new(text) {
        Ok(s) => s.into_raw(),
        Err(_) => {
            warn!("string contains an interior NUL, not handed out");
            std::ptr::null_mut()
        }
    }
}

#[no_mangle]
pub extern "C" fn webrtc_new() -> *mut PasteSession {
    crate::logger::init(None);
    let config = PeerConfig::default();
    let engine = Arc::new(RtcEngine::new(config.clone()));
    new_session(engine, &config)
}

fn new_session(engine: Arc<dyn Engine>, config: &PeerConfig) -> *mut PasteSession {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            warn!(error = %err, "cannot start runtime");
            return std::ptr::null_mut();
        }
    };
    let controller = SessionController::new(engine, config);
    Box::into_raw(Box::new(PasteSession {
        runtime,
        controller,
    }))
}

/// Creates the offer; fetch it with `webrtc_get_local_description`.
#[no_mangle]
pub extern "C" fn webrtc_create_offer(session: *mut PasteSession) -> c_int {
    if session.is_null() {
        return STATUS_BAD_ARGUMENT;
    }
    let session = unsafe { &mut *session };
    let controller = &mut session.controller;
    status(
        session
            .runtime
            .block_on(async { controller.create_offer_text().await.map(|_| ()) }),
    )
}

/// Takes the peer's tagged offer and prepares the answer.
#[no_mangle]
pub extern "C" fn webrtc_process_offer(session: *mut PasteSession, text: *const c_char) -> c_int {
    if session.is_null() {
        return STATUS_BAD_ARGUMENT;
    }
    let Some(text) = (unsafe { text_arg(text) }) else {
        return STATUS_BAD_ARGUMENT;
    };
    let session = unsafe { &mut *session };
    let controller = &mut session.controller;
    status(
        session
            .runtime
            .block_on(async { controller.accept_offer_text(text).await.map(|_| ()) }),
    )
}

#[no_mangle]
pub extern "C" fn webrtc_process_answer(session: *mut PasteSession, text: *const c_char) -> c_int {
    if session.is_null() {
        return STATUS_BAD_ARGUMENT;
    }
    let Some(text) = (unsafe { text_arg(text) }) else {
        return STATUS_BAD_ARGUMENT;
    };
    let session = unsafe { &mut *session };
    let controller = &mut session.controller;
    status(session.runtime.block_on(controller.accept_answer_text(text)))
}

/// Tagged payload to hand to the peer, or null if none yet.
#[no_mangle]
pub extern "C" fn webrtc_get_local_description(session: *mut PasteSession) -> *mut c_char {
    if session.is_null() {
        return std::ptr::null_mut();
    }
    let session = unsafe { &*session };
    match session.controller.local_payload() {
        Some(payload) => into_c_string(payload),
        None => std::ptr::null_mut(),
    }
}

/// Non-blocking readiness check.
#[no_mangle]
pub extern "C" fn webrtc_is_connected(session: *mut PasteSession) -> bool {
    if session.is_null() {
        return false;
    }
    let session = unsafe { &mut *session };
    let controller = &mut session.controller;
    session
        .runtime
        .block_on(controller.poll())
        .unwrap_or(false)
}

#[no_mangle]
pub extern "C" fn webrtc_send_message(session: *mut PasteSession, text: *const c_char) -> c_int {
    if session.is_null() {
        return STATUS_BAD_ARGUMENT;
    }
    let Some(text) = (unsafe { text_arg(text) }) else {
        return STATUS_BAD_ARGUMENT;
    };
    let session = unsafe { &mut *session };
    let controller = &mut session.controller;
    // pick up readiness before the state check in send
    if let Err(err) = session.runtime.block_on(controller.poll()) {
        return err.code();
    }
    status(session.runtime.block_on(controller.send_message(text)))
}

/// Messages received since the last call, written to `messages` (null
/// when there are none) and `count`. Messages holding a NUL byte cannot
/// cross the ABI and are dropped with a warning.
///
/// A session whose peer has left still hands over what arrived before.
#[no_mangle]
pub extern "C" fn webrtc_get_messages(
    session: *mut PasteSession,
    messages: *mut *mut *mut c_char,
    count: *mut usize,
) -> c_int {
    if session.is_null() || messages.is_null() || count.is_null() {
        return STATUS_BAD_ARGUMENT;
    }
    unsafe {
        *messages = std::ptr::null_mut();
        *count = 0;
    }
    let session = unsafe { &mut *session };
    let controller = &mut session.controller;
    let already = controller.messages().len();
    let all = match session.runtime.block_on(controller.refresh_messages()) {
        Ok(all) => all,
        Err(err) => return err.code(),
    };

    let fresh: Vec<*mut c_char> = all[already..]
        .iter()
        .filter_map(|message| match CString::new(message.as_str()) {
            Ok(s) => Some(s.into_raw()),
            Err(_) => {
                warn!(len = message.len(), "dropping message with an interior NUL");
                None
            }
        })
        .collect();
    if fresh.is_empty() {
        return 0;
    }
    unsafe {
        *count = fresh.len();
        *messages = Box::into_raw(fresh.into_boxed_slice()) as *mut *mut c_char;
    }
    0
}

#[no_mangle]
pub extern "C" fn webrtc_free_messages(messages: *mut *mut c_char, count: usize) {
    if messages.is_null() {
        return;
    }
    let slice = unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(messages, count)) };
    for &ptr in slice.iter() {
        free_string(ptr);
    }
}

#[no_mangle]
pub extern "C" fn webrtc_destroy(session: *mut PasteSession) {
    if session.is_null() {
        return;
    }
    let session = unsafe { Box::from_raw(session) };
    let PasteSession {
        runtime,
        mut controller,
    } = *session;
    runtime.block_on(controller.close());
    drop(controller);
    drop(runtime);
}

#[no_mangle]
pub extern "C" fn free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::LoopbackEngine;
    use crate::Error;

    #[test]
    fn null_sessions_are_rejected() {
        let null = std::ptr::null_mut();
        assert_eq!(webrtc_create_offer(null), STATUS_BAD_ARGUMENT);
        assert_eq!(webrtc_send_message(null, std::ptr::null()), STATUS_BAD_ARGUMENT);
        assert!(webrtc_get_local_description(null).is_null());
        assert!(!webrtc_is_connected(null));
        let mut messages = std::ptr::null_mut();
        let mut count = 7usize;
        assert_eq!(
            webrtc_get_messages(null, &mut messages, &mut count),
            STATUS_BAD_ARGUMENT
        );
        webrtc_free_messages(std::ptr::null_mut(), 0);
        webrtc_destroy(null);
        free_string(std::ptr::null_mut());
    }

    #[test]
    fn fresh_session_lifecycle() {
        let session = webrtc_new();
        assert!(!session.is_null());
        assert!(webrtc_get_local_description(session).is_null());
        assert!(!webrtc_is_connected(session));

        let msg = CString::new("hi").unwrap();
        assert_eq!(webrtc_send_message(session, msg.as_ptr()), Error::NotConnected.code());

        let bogus = CString::new("not a payload").unwrap();
        assert_eq!(
            webrtc_process_offer(session, bogus.as_ptr()),
            Error::UnrecognizedPayload(String::new()).code()
        );

        let mut messages = std::ptr::null_mut();
        let mut count = 3usize;
        assert_eq!(webrtc_get_messages(session, &mut messages, &mut count), 0);
        assert!(messages.is_null());
        assert_eq!(count, 0);
        webrtc_destroy(session);
    }

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let text = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_owned();
        free_string(ptr);
        text
    }

    fn loopback_pair(engine: &LoopbackEngine) -> (*mut PasteSession, *mut PasteSession) {
        let config = PeerConfig::default();
        let a = new_session(Arc::new(engine.clone()), &config);
        let b = new_session(Arc::new(engine.clone()), &config);

        assert_eq!(webrtc_create_offer(a), 0);
        let offer = CString::new(take_string(webrtc_get_local_description(a))).unwrap();
        assert_eq!(webrtc_process_offer(b, offer.as_ptr()), 0);
        let answer = CString::new(take_string(webrtc_get_local_description(b))).unwrap();
        assert_eq!(webrtc_process_answer(a, answer.as_ptr()), 0);
        assert!(webrtc_is_connected(a));
        assert!(webrtc_is_connected(b));
        (a, b)
    }

    fn fetch(session: *mut PasteSession) -> (c_int, Vec<String>) {
        let mut messages = std::ptr::null_mut();
        let mut count = 0usize;
        let status = webrtc_get_messages(session, &mut messages, &mut count);
        let texts = (0..count)
            .map(|i| unsafe { CStr::from_ptr(*messages.add(i)) }.to_str().unwrap().to_owned())
            .collect();
        webrtc_free_messages(messages, count);
        (status, texts)
    }

    #[test]
    fn messages_cross_the_abi_and_nul_ones_are_dropped() {
        let engine = LoopbackEngine::new();
        let (a, b) = loopback_pair(&engine);

        let hello = CString::new("hello").unwrap();
        assert_eq!(webrtc_send_message(a, hello.as_ptr()), 0);
        let sender = unsafe { &mut *a };
        sender
            .runtime
            .block_on(sender.controller.send_message("a\0b"))
            .unwrap();

        assert_eq!(fetch(b), (0, vec!["hello".to_string()]));
        assert_eq!(fetch(b), (0, Vec::new()));

        webrtc_destroy(a);
        webrtc_destroy(b);
        assert_eq!(engine.released(), 2);
    }

    #[test]
    fn failed_session_reports_its_status() {
        let engine = LoopbackEngine::new();
        let (a, b) = loopback_pair(&engine);

        engine.sever("network gone");
        let failed = Error::Failed(String::new()).code();
        assert_eq!(fetch(b), (failed, Vec::new()));
        let text = CString::new("hi").unwrap();
        assert_eq!(webrtc_send_message(a, text.as_ptr()), failed);

        webrtc_destroy(a);
        webrtc_destroy(b);
    }

    #[test]
    fn peer_leaving_keeps_buffered_messages() {
        let engine = LoopbackEngine::new();
        let (a, b) = loopback_pair(&engine);

        let last = CString::new("last words").unwrap();
        assert_eq!(webrtc_send_message(a, last.as_ptr()), 0);
        webrtc_destroy(a);

        assert_eq!(fetch(b), (0, vec!["last words".to_string()]));
        assert!(!webrtc_is_connected(b));
        webrtc_destroy(b);
    }

    #[test]
    fn strings_round_trip_through_free() {
        let ptr = into_c_string("OFFER:\nv=0");
        assert!(!ptr.is_null());
        assert_eq!(unsafe { CStr::from_ptr(ptr) }.to_str().unwrap(), "OFFER:\nv=0");
        free_string(ptr);
        assert!(into_c_string("a\0b").is_null());
    }
}
