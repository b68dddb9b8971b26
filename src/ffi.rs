use crate::Context::{ContextParams, FrameDriver, RendererEnvironment};
use crate::Core::registry::INVALID_HANDLE;
use crate::Frame::copy_to_strided;
use lazy_static::lazy_static;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

// Error codes
pub const SHM_RENDER_SUCCESS: c_int = 0;
pub const SHM_RENDER_ERROR_NULL_POINTER: c_int = -1;
pub const SHM_RENDER_ERROR_INVALID_ARG: c_int = -2;
pub const SHM_RENDER_ERROR_INTERNAL: c_int = -6;

/// Variable holding the log filter for hosts that link the library.
pub const LOG_ENV: &str = "SHM_RENDER_LOG";

lazy_static! {
    static ref DRIVER: FrameDriver = FrameDriver::default();
}

static LOGGING: Once = Once::new();

/// Install a stderr `tracing` subscriber unless the host already has one.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// The driver behind the C entry points.
pub fn global_driver() -> &'static FrameDriver {
    &DRIVER
}

fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("panic caught at the C boundary");
            fallback
        }
    }
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

// -----------------------------------------------------------------------------
// Setup
// -----------------------------------------------------------------------------

/// Set up logging and the process-wide renderer environment.
///
/// Safe to call more than once; later calls only log whether the environment
/// is usable. Context creation calls it implicitly.
#[no_mangle]
pub extern "C" fn shm_render_init() {
    guarded((), || {
        init_logging();
        if let Err(e) = RendererEnvironment::global() {
            tracing::error!(error = %e, "renderer environment unavailable");
        }
    })
}

// -----------------------------------------------------------------------------
// Context API
// -----------------------------------------------------------------------------

/// Create a render context.
///
/// # Arguments
/// * `width`, `height` - Frame size in pixels, both positive.
/// * `shader_id` - Shader identifier (NUL-terminated UTF-8).
/// * `api_key` - Access key for the renderer, or NULL / "" for none.
///
/// # Returns
/// * A non-zero handle, or 0 on any failure.
#[no_mangle]
pub extern "C" fn shm_render_create_context(
    width: c_int,
    height: c_int,
    shader_id: *const c_char,
    api_key: *const c_char,
) -> u64 {
    guarded(INVALID_HANDLE, || {
        init_logging();
        if width <= 0 || height <= 0 {
            tracing::error!(width, height, "frame size must be positive");
            return INVALID_HANDLE;
        }
        let Some(shader_id) = (unsafe { c_str(shader_id) }) else {
            tracing::error!("shader id is NULL or not UTF-8");
            return INVALID_HANDLE;
        };
        let api_key = if api_key.is_null() {
            ""
        } else {
            match unsafe { c_str(api_key) } {
                Some(key) => key,
                None => {
                    tracing::error!("api key is not UTF-8");
                    return INVALID_HANDLE;
                }
            }
        };

        let env = match RendererEnvironment::global() {
            Ok(env) => env,
            Err(e) => {
                tracing::error!(error = %e, "renderer environment unavailable");
                return INVALID_HANDLE;
            }
        };
        let params = ContextParams::new(width as u32, height as u32, shader_id).with_credential(api_key);
        match DRIVER.create_context(&env, &params) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "failed to create render context");
                INVALID_HANDLE
            }
        }
    })
}

/// Render one frame.
///
/// # Arguments
/// * `handle` - Handle from `shm_render_create_context`.
/// * `time` - Frame time in seconds.
///
/// # Returns
/// * Address of `width * height * 4` pixel bytes, valid until the next call
///   on this handle, or 0 on failure.
#[no_mangle]
pub extern "C" fn shm_render_render(handle: u64, time: f32) -> u64 {
    guarded(0, || match DRIVER.render(handle, time as f64) {
        Ok(frame) => frame.addr(),
        Err(e) => {
            tracing::error!(handle, error = %e, "render failed");
            0
        }
    })
}

/// Close a render context. Unknown or already closed handles are ignored.
#[no_mangle]
pub extern "C" fn shm_render_close_context(handle: u64) {
    guarded((), || match DRIVER.close_context(handle) {
        Ok(()) => {}
        Err(crate::error::RenderError::NotFound(_)) => {
            tracing::warn!(handle, "close on unknown render context ignored");
        }
        Err(e) => {
            tracing::error!(handle, error = %e, "render context closed with errors");
        }
    })
}

// -----------------------------------------------------------------------------
// Frame helpers
// -----------------------------------------------------------------------------

/// Copy a packed frame into a buffer with a wider line stride.
///
/// # Arguments
/// * `src` - `width * height * 4` packed bytes (e.g. from `shm_render_render`).
/// * `dst` - Destination with at least `dst_stride * height` bytes.
/// * `dst_stride` - Destination bytes per row, at least `width * 4`.
///
/// # Returns
/// * 0 on success, negative error code otherwise.
#[no_mangle]
pub extern "C" fn shm_render_copy_to_strided(
    src: *const u8,
    dst: *mut u8,
    width: c_int,
    height: c_int,
    dst_stride: c_int,
) -> c_int {
    if src.is_null() || dst.is_null() {
        return SHM_RENDER_ERROR_NULL_POINTER;
    }
    if width <= 0 || height <= 0 || dst_stride < width.saturating_mul(4) {
        return SHM_RENDER_ERROR_INVALID_ARG;
    }
    let (width, height, dst_stride) = (width as usize, height as usize, dst_stride as usize);

    guarded(SHM_RENDER_ERROR_INTERNAL, || {
        let src = unsafe { std::slice::from_raw_parts(src, width * height * 4) };
        let dst = unsafe { std::slice::from_raw_parts_mut(dst, dst_stride * height) };
        match copy_to_strided(src, dst, width, height, dst_stride) {
            Ok(()) => SHM_RENDER_SUCCESS,
            Err(_) => SHM_RENDER_ERROR_INVALID_ARG,
        }
    })
}
