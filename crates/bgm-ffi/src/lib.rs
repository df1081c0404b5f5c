//! C FFI surface for bgm.
//!
//! Pattern: opaque handle + C strings + JSON serialization. A handle owns
//! one controller and the timer thread that drives its fades.
//!
//! Every call is fire-and-forget: fades finish on the frame thread and the
//! host polls `bgm_state` (or `bgm_output_volume`) to observe them.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use bgm_core::{AudioResource, Controller, ControllerConfig, MemoryResource, TimerScheduler};

// ---------------------------------------------------------------------------
// Error handling (thread-local last error)
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(msg: String) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(msg));
}

fn clear_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Returns the last error message (caller frees with `bgm_string_free`).
#[no_mangle]
pub extern "C" fn bgm_last_error() -> *mut c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow_mut()
            .take()
            .and_then(|s| CString::new(s).ok())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut())
    })
}

/// Frees a string returned from bgm FFI.
///
/// # Safety
/// Must be a pointer returned from this FFI and not already freed.
#[no_mangle]
pub unsafe extern "C" fn bgm_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------------------------------------------------------------------------
// Opaque handle
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct BgmHandle {
    _private: [u8; 0],
}

struct BgmHandleInner {
    controller: Controller,
    frames: Arc<TimerScheduler>,
}

impl BgmHandleInner {
    fn open<F>(config: ControllerConfig, factory: F) -> *mut BgmHandle
    where
        F: Fn() -> Arc<dyn AudioResource> + Send + Sync + 'static,
    {
        let frames = Arc::new(TimerScheduler::new());
        let controller = Controller::new(config, frames.clone(), factory);
        controller.initialize();
        Box::into_raw(Box::new(BgmHandleInner { controller, frames })) as *mut BgmHandle
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Opens a controller that plays through the default output device.
/// `config_json` may be NULL for defaults. Returns NULL on error.
///
/// # Safety
/// `config_json` must be NULL or a valid null-terminated C string.
#[cfg(feature = "native")]
#[no_mangle]
pub unsafe extern "C" fn bgm_open(config_json: *const c_char) -> *mut BgmHandle {
    clear_error();
    let config = match parse_config(config_json) {
        Ok(c) => c,
        Err(e) => {
            set_error(e);
            return ptr::null_mut();
        }
    };
    BgmHandleInner::open(config, || {
        Arc::new(bgm_core::NativeTrack::new()) as Arc<dyn AudioResource>
    })
}

/// Opens a controller with no audio output. The host renders the track
/// itself and follows `bgm_output_volume`. Returns NULL on error.
///
/// # Safety
/// `config_json` must be NULL or a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn bgm_open_headless(config_json: *const c_char) -> *mut BgmHandle {
    clear_error();
    let config = match parse_config(config_json) {
        Ok(c) => c,
        Err(e) => {
            set_error(e);
            return ptr::null_mut();
        }
    };
    BgmHandleInner::open(config, || {
        Arc::new(MemoryResource::ready()) as Arc<dyn AudioResource>
    })
}

/// Disposes the controller, stops the frame thread and frees the handle.
#[no_mangle]
pub extern "C" fn bgm_close(handle: *mut BgmHandle) {
    if !handle.is_null() {
        unsafe {
            let inner = Box::from_raw(handle as *mut BgmHandleInner);
            inner.controller.dispose();
            inner.frames.shutdown();
        }
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// Fade in and play. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn bgm_play(handle: *mut BgmHandle) -> i32 {
    with_controller(handle, |c| {
        c.play();
    })
}

/// Fade out, then pause. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn bgm_pause(handle: *mut BgmHandle) -> i32 {
    with_controller(handle, |c| {
        c.pause();
    })
}

/// Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn bgm_toggle(handle: *mut BgmHandle) -> i32 {
    with_controller(handle, |c| {
        c.toggle();
    })
}

/// Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn bgm_toggle_mute(handle: *mut BgmHandle) -> i32 {
    with_controller(handle, |c| {
        c.toggle_mute();
    })
}

/// Set the resting volume (clamped to 0.0-1.0). Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn bgm_set_volume(handle: *mut BgmHandle, volume: f32) -> i32 {
    clear_error();
    if !volume.is_finite() {
        set_error(format!("volume must be finite, got {}", volume));
        return 0;
    }
    with_controller(handle, |c| c.set_volume(volume))
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Current state as JSON (caller frees), or NULL on error.
#[no_mangle]
pub extern "C" fn bgm_state(handle: *mut BgmHandle) -> *mut c_char {
    clear_error();
    match controller_ref(handle) {
        Ok(c) => json_to_cstr(&c.state()),
        Err(e) => err_null(e),
    }
}

/// Level the resource is producing right now. Returns -1.0 on error.
#[no_mangle]
pub extern "C" fn bgm_output_volume(handle: *mut BgmHandle) -> f32 {
    clear_error();
    match controller_ref(handle) {
        Ok(c) => c.output_volume(),
        Err(e) => {
            set_error(e);
            -1.0
        }
    }
}

/// Tags and stream parameters of a track file as JSON (caller frees),
/// or NULL on error.
///
/// # Safety
/// `path` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn bgm_probe(path: *const c_char) -> *mut c_char {
    clear_error();
    let path = match read_cstr(path) {
        Ok(p) => p,
        Err(e) => return err_null(e),
    };
    match bgm_core::track::probe(&path) {
        Ok(info) => json_to_cstr(&info),
        Err(e) => err_null(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Returns the FFI API version.
#[no_mangle]
pub extern "C" fn bgm_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn controller_ref<'a>(handle: *mut BgmHandle) -> Result<&'a Controller, String> {
    if handle.is_null() {
        return Err("null bgm handle".into());
    }
    let inner = unsafe { &*(handle as *mut BgmHandleInner) };
    Ok(&inner.controller)
}

fn with_controller(handle: *mut BgmHandle, f: impl FnOnce(&Controller)) -> i32 {
    clear_error();
    match controller_ref(handle) {
        Ok(c) => {
            f(c);
            1
        }
        Err(e) => {
            set_error(e);
            0
        }
    }
}

fn parse_config(ptr: *const c_char) -> Result<ControllerConfig, String> {
    if ptr.is_null() {
        return Ok(ControllerConfig::default());
    }
    let json = read_cstr(ptr)?;
    let config = ControllerConfig::from_json(&json).map_err(|e| e.to_string())?;
    log::debug!("bgm-ffi: opening with track {}", config.track);
    Ok(config)
}

fn read_cstr(ptr: *const c_char) -> Result<String, String> {
    if ptr.is_null() {
        return Err("null string pointer".into());
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(String::from)
            .map_err(|_| "invalid utf-8".into())
    }
}

fn json_to_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => to_cstr(json),
        Err(e) => err_null(e.to_string()),
    }
}

fn to_cstr(s: String) -> *mut c_char {
    CString::new(s)
        .map(|c| c.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn err_null(msg: String) -> *mut c_char {
    set_error(msg);
    ptr::null_mut()
}
