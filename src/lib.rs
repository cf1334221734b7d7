// Live Effect Core - Rust Audio Engine
// Low-latency full-duplex pass-through from microphone to speaker

// Module declarations
pub mod api;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod hal;

#[cfg(target_os = "android")]
pub mod bridge;

// Re-exports for convenience
pub use api::EngineHandle;
pub use config::{ConfigOptions, EngineConfig, PeriodLayout};
pub use engine::{DuplexEngine, DuplexEngineBuilder, EngineNotice, NoticeKind, StreamState};
pub use error::{AudioError, ConfigError, ErrorCode, StatusCode};

use once_cell::sync::OnceCell;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Install the tracing subscriber once per process
///
/// Desktop: fmt output on stderr filtered by `RUST_LOG` (default `info`).
/// Android: logcat under the `LiveEffect` tag.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "android")] {
                use tracing_subscriber::layer::SubscriberExt;
                use tracing_subscriber::util::SubscriberInitExt;

                match tracing_android::layer("LiveEffect") {
                    Ok(layer) => {
                        let _ = tracing_subscriber::registry()
                            .with(tracing_subscriber::EnvFilter::new("debug"))
                            .with(layer)
                            .try_init();
                    }
                    Err(err) => eprintln!("LiveEffect: android log layer unavailable: {}", err),
                }
            } else {
                let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
        }
    });
}

/// JNI_OnLoad is called when the native library is loaded by Android
/// This function initializes the Android context required by oboe-rs
#[cfg(target_os = "android")]
#[no_mangle]
pub extern "system" fn JNI_OnLoad(
    vm: jni::JavaVM,
    _reserved: *mut std::ffi::c_void,
) -> jni::sys::jint {
    init_logging();

    log::info!("JNI_OnLoad called - initializing Android context");

    // SAFETY: must run before any Oboe call; the JavaVM pointer is valid for
    // the life of the process. No Activity context is available here.
    unsafe {
        ndk_context::initialize_android_context(
            vm.get_java_vm_pointer() as *mut std::ffi::c_void,
            std::ptr::null_mut(),
        );
    }

    log::info!("Android context initialized successfully");

    jni::sys::JNI_VERSION_1_6
}
