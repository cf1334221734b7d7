//! JNI bridge for the Android host
//!
//! The Java side holds the engine as an opaque `long` returned by `create`
//! and passes it back on every call. `release` destroys it; using the value
//! afterwards is undefined, exactly like any other freed native handle.
//!
//! Host class: `com.google.oboe.samples.liveEffect.LiveEffectEngine`.

mod notifier;

use jni::objects::JClass;
use jni::sys::{jboolean, jint, jlong, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;

use crate::api::EngineHandle;
use crate::config::ConfigOptions;
use crate::error::StatusCode;
use crate::hal::AudioApi;

use notifier::JavaNotifier;

/// API selectors used by the Java UI (not oboe's codes).
const JAVA_API_AAUDIO: jint = 0;
const JAVA_API_OPENSLES: jint = 1;

/// What a Java `long` handle points at.
struct BridgeHandle {
    engine: EngineHandle,
    _notifier: Option<JavaNotifier>,
}

fn to_jboolean(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// # Safety
/// `handle` must be 0 or a value returned by `create` that has not been
/// released.
unsafe fn bridge_ref<'a>(handle: jlong) -> Option<&'a BridgeHandle> {
    let bridge = (handle as *const BridgeHandle).as_ref();
    if bridge.is_none() {
        log::error!("Engine handle is null, call create() first");
    }
    bridge
}

#[no_mangle]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_create<'local>(
    env: JNIEnv<'local>,
    class: JClass<'local>,
) -> jlong {
    let engine = EngineHandle::create();

    let notifier = match (env.get_java_vm(), env.new_global_ref(&class)) {
        (Ok(vm), Ok(class_ref)) => match JavaNotifier::spawn(vm, class_ref) {
            Ok((notifier, observer)) => {
                engine.set_observer(Some(observer));
                Some(notifier)
            }
            Err(err) => {
                log::warn!("Period notifications disabled: {}", err);
                None
            }
        },
        _ => {
            log::warn!("Period notifications disabled: no JavaVM or class reference");
            None
        }
    };

    let bridge = Box::new(BridgeHandle {
        engine,
        _notifier: notifier,
    });
    Box::into_raw(bridge) as jlong
}

#[no_mangle]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_release<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
) -> jint {
    if handle == 0 {
        return StatusCode::Ok.as_i32();
    }
    // SAFETY: non-zero handles come from `create` and are released once.
    let bridge = unsafe { Box::from_raw(handle as *mut BridgeHandle) };
    let BridgeHandle { engine, _notifier } = *bridge;
    // Streams close before the notifier thread is joined.
    let status = engine.release();
    drop(_notifier);
    status.as_i32()
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_setupParameters<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
    period_len_ms: jint,
    native_api: jint,
    sample_rate: jint,
    channel_count: jint,
    format: jint,
    sharing_mode: jint,
    performance_mode: jint,
    input_preset: jint,
    usage: jint,
    record_device_id: jint,
    playback_device_id: jint,
    session_id: jint,
    channel_conversion_allowed: jboolean,
    format_conversion_allowed: jboolean,
    rate_conversion_quality: jint,
) -> jint {
    // SAFETY: see `bridge_ref`.
    let Some(bridge) = (unsafe { bridge_ref(handle) }) else {
        return StatusCode::ErrorBase.as_i32();
    };
    let options = ConfigOptions {
        period_len_ms,
        native_api,
        sample_rate,
        channel_count,
        format,
        sharing_mode,
        performance_mode,
        input_preset,
        usage,
        record_device_id,
        playback_device_id,
        session_id,
        channel_conversion_allowed: channel_conversion_allowed != JNI_FALSE,
        format_conversion_allowed: format_conversion_allowed != JNI_FALSE,
        rate_conversion_quality,
    };
    bridge.engine.setup_parameters(&options).as_i32()
}

#[no_mangle]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_startAudio<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
) -> jint {
    // SAFETY: see `bridge_ref`.
    match unsafe { bridge_ref(handle) } {
        Some(bridge) => bridge.engine.start_audio().as_i32(),
        None => StatusCode::ErrorBase.as_i32(),
    }
}

#[no_mangle]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_stopAudio<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
) -> jint {
    // SAFETY: see `bridge_ref`.
    match unsafe { bridge_ref(handle) } {
        Some(bridge) => bridge.engine.stop_audio().as_i32(),
        None => StatusCode::ErrorBase.as_i32(),
    }
}

#[no_mangle]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_setEffectOn<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
    is_effect_on: jboolean,
) -> jboolean {
    // SAFETY: see `bridge_ref`.
    match unsafe { bridge_ref(handle) } {
        Some(bridge) => to_jboolean(bridge.engine.set_effect_on(is_effect_on != JNI_FALSE)),
        None => JNI_FALSE,
    }
}

#[no_mangle]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_setRecordingDeviceId<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
    device_id: jint,
) {
    // SAFETY: see `bridge_ref`.
    if let Some(bridge) = unsafe { bridge_ref(handle) } {
        bridge.engine.set_recording_device_id(device_id);
    }
}

#[no_mangle]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_setPlaybackDeviceId<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
    device_id: jint,
) {
    // SAFETY: see `bridge_ref`.
    if let Some(bridge) = unsafe { bridge_ref(handle) } {
        bridge.engine.set_playback_device_id(device_id);
    }
}

#[no_mangle]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_setAPI<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
    api_type: jint,
) -> jboolean {
    // SAFETY: see `bridge_ref`.
    let Some(bridge) = (unsafe { bridge_ref(handle) }) else {
        return JNI_FALSE;
    };
    let api = match api_type {
        JAVA_API_AAUDIO => AudioApi::AAudio,
        JAVA_API_OPENSLES => AudioApi::OpenSLES,
        other => {
            log::error!("Unknown API selection to setAPI() {}", other);
            return JNI_FALSE;
        }
    };
    to_jboolean(bridge.engine.set_api(api))
}

#[no_mangle]
pub extern "system" fn Java_com_google_oboe_samples_liveEffect_LiveEffectEngine_isAAudioRecommended<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    handle: jlong,
) -> jboolean {
    // SAFETY: see `bridge_ref`.
    match unsafe { bridge_ref(handle) } {
        Some(bridge) => to_jboolean(bridge.engine.is_aaudio_recommended()),
        None => JNI_FALSE,
    }
}
