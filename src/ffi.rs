//! FFI bindings for the MCA engine
//!
//! This module provides C-compatible functions for driving the engine from other
//! languages. All payloads are JSON in null-terminated C strings. Returned strings
//! are allocated here and must be freed by the caller using `mca_free_string`.
//! Times are RFC 3339 strings; a NULL time means "now".

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, Utc};

use crate::api::{handle_action, handle_orchestrate};
use crate::config::EngineConfig;
use crate::engine::InterventionEngine;
use crate::store::MemoryStore;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Parse an optional RFC 3339 time, defaulting to the current time
unsafe fn parse_now(ptr: *const c_char) -> Result<DateTime<Utc>, String> {
    if ptr.is_null() {
        return Ok(Utc::now());
    }
    let text = cstr_to_string(ptr).ok_or_else(|| "Invalid time string pointer".to_string())?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("Invalid time '{text}': {e}"))
}

// ============================================================================
// Engine lifecycle
// ============================================================================

/// Opaque handle to an InterventionEngine
pub struct McaEngineHandle {
    engine: InterventionEngine<MemoryStore>,
}

/// Create a new engine.
///
/// # Safety
/// - `config_toml` may be NULL for the default configuration, otherwise it must
///   be a valid null-terminated C string containing TOML.
/// - Returns a pointer that must be freed with `mca_engine_free`.
/// - Returns NULL on error; call `mca_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mca_engine_new(config_toml: *const c_char) -> *mut McaEngineHandle {
    clear_last_error();

    let config = if config_toml.is_null() {
        EngineConfig::default()
    } else {
        let text = match cstr_to_string(config_toml) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match EngineConfig::from_toml_str(&text) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let handle = Box::new(McaEngineHandle {
        engine: InterventionEngine::new(config),
    });
    Box::into_raw(handle)
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `mca_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mca_engine_free(engine: *mut McaEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Run an orchestration request.
///
/// Returns the HTTP-shaped response `{"status": ..., "body": ...}`; a 400
/// status is a normal return, not an FFI error.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `mca_engine_new`.
/// - `request_json` must be a valid null-terminated C string.
/// - `now_rfc3339` may be NULL.
/// - Returns a newly allocated string that must be freed with `mca_free_string`.
/// - Returns NULL on error; call `mca_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mca_engine_orchestrate(
    engine: *mut McaEngineHandle,
    request_json: *const c_char,
    now_rfc3339: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *engine;

    let body = match cstr_to_string(request_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };
    let now = match parse_now(now_rfc3339) {
        Ok(now) => now,
        Err(e) => {
            set_last_error(&e);
            return ptr::null_mut();
        }
    };

    let response = handle_orchestrate(&mut handle.engine, &body, now);
    match serde_json::to_string(&response) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Record a user action on an open intervention.
///
/// `action_json` is `{"userId", "interventionId", "action"}`. Returns the
/// HTTP-shaped response.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `mca_engine_new`.
/// - `action_json` must be a valid null-terminated C string.
/// - `now_rfc3339` may be NULL.
/// - Returns a newly allocated string that must be freed with `mca_free_string`.
/// - Returns NULL on error; call `mca_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mca_engine_record_action(
    engine: *mut McaEngineHandle,
    action_json: *const c_char,
    now_rfc3339: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *engine;

    let body = match cstr_to_string(action_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };
    let now = match parse_now(now_rfc3339) {
        Ok(now) => now,
        Err(e) => {
            set_last_error(&e);
            return ptr::null_mut();
        }
    };

    let response = handle_action(&mut handle.engine, &body, now);
    match serde_json::to_string(&response) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Fire due timers (debounced analyses, idle timeouts).
///
/// Returns a JSON array of engine events.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `mca_engine_new`.
/// - `now_rfc3339` may be NULL.
/// - Returns a newly allocated string that must be freed with `mca_free_string`.
/// - Returns NULL on error; call `mca_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mca_engine_tick(
    engine: *mut McaEngineHandle,
    now_rfc3339: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *engine;

    let now = match parse_now(now_rfc3339) {
        Ok(now) => now,
        Err(e) => {
            set_last_error(&e);
            return ptr::null_mut();
        }
    };

    let events = handle.engine.tick(now);
    match serde_json::to_string(&events) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// History persistence
// ============================================================================

/// Save detection history, outcomes and audit rows to JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `mca_engine_new`.
/// - Returns a newly allocated string that must be freed with `mca_free_string`.
/// - Returns NULL on error; call `mca_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mca_engine_save_history(engine: *mut McaEngineHandle) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    match handle.engine.store().to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Replace the engine's history with previously saved JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `mca_engine_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `mca_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn mca_engine_load_history(
    engine: *mut McaEngineHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &*engine;

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    match handle.engine.store().load_json(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by MCA functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an MCA function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn mca_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next MCA function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn mca_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn mca_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
