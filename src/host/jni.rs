// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! JNI entry points for `dev.mdwn.pcmbank.PcmBank`. Each one forwards to the
//! matching `host` call.

use std::ffi::c_void;
use std::sync::Arc;

use jni::objects::{GlobalRef, JClass, JObject, JObjectArray, JString};
use jni::sys::{jboolean, jint, JNI_FALSE, JNI_TRUE, JNI_VERSION_1_6};
use jni::{JNIEnv, JavaVM};
use parking_lot::{const_mutex, Mutex};
use tracing::{error, info};

use crate::assets::DirectoryAssetSource;

/// The application context handed to `ndk_context`. Kept alive for the life
/// of the process.
static ANDROID_CONTEXT: Mutex<Option<GlobalRef>> = const_mutex(None);

fn flag(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

#[no_mangle]
pub extern "system" fn JNI_OnLoad(_vm: JavaVM, _reserved: *mut c_void) -> jint {
    super::init_logging();
    info!("pcmbank native library loaded");
    JNI_VERSION_1_6
}

/// cpal's Android backend finds the audio service through `ndk_context`.
fn init_android_context(env: &mut JNIEnv, context: &JObject) -> jni::errors::Result<()> {
    let mut slot = ANDROID_CONTEXT.lock();
    if slot.is_some() {
        return Ok(());
    }
    let vm = env.get_java_vm()?;
    let context = env.new_global_ref(context)?;
    // SAFETY: the VM pointer is valid for the life of the process and the
    // global reference is stored below, so it outlives every user.
    unsafe {
        ndk_context::initialize_android_context(
            vm.get_java_vm_pointer().cast(),
            context.as_obj().as_raw().cast(),
        );
    }
    *slot = Some(context);
    Ok(())
}

fn read_string(env: &mut JNIEnv, value: &JString) -> Option<String> {
    match env.get_string(value) {
        Ok(value) => Some(value.into()),
        Err(e) => {
            error!(err = %e, "Unable to read Java string");
            None
        }
    }
}

fn read_string_array(env: &mut JNIEnv, values: &JObjectArray) -> Option<Vec<String>> {
    let len = env.get_array_length(values).ok()?;
    let mut strings = Vec::with_capacity(len.max(0) as usize);
    for i in 0..len {
        let element = env.get_object_array_element(values, i).ok()?;
        let string = read_string(env, &JString::from(element))?;
        strings.push(string);
    }
    Some(strings)
}

#[no_mangle]
pub extern "system" fn Java_dev_mdwn_pcmbank_PcmBank_jniCreate(
    mut env: JNIEnv,
    _class: JClass,
    context: JObject,
    asset_root: JString,
    sample_rate: jint,
    buffer_size: jint,
) -> jboolean {
    if let Err(e) = init_android_context(&mut env, &context) {
        error!(err = %e, "Unable to initialize Android context");
        return JNI_FALSE;
    }
    let Some(asset_root) = read_string(&mut env, &asset_root) else {
        return JNI_FALSE;
    };
    let (Ok(sample_rate), Ok(buffer_size)) =
        (u32::try_from(sample_rate), usize::try_from(buffer_size))
    else {
        error!(sample_rate, buffer_size, "Negative stream parameters");
        return JNI_FALSE;
    };
    flag(super::create(
        sample_rate,
        buffer_size,
        Arc::new(DirectoryAssetSource::new(asset_root)),
    ))
}

#[no_mangle]
pub extern "system" fn Java_dev_mdwn_pcmbank_PcmBank_jniShutdown(
    _env: JNIEnv,
    _class: JClass,
) -> jboolean {
    flag(super::shutdown())
}

#[no_mangle]
pub extern "system" fn Java_dev_mdwn_pcmbank_PcmBank_jniOnPause(_env: JNIEnv, _class: JClass) {
    super::on_pause();
}

#[no_mangle]
pub extern "system" fn Java_dev_mdwn_pcmbank_PcmBank_jniOnResume(_env: JNIEnv, _class: JClass) {
    super::on_resume();
}

#[no_mangle]
pub extern "system" fn Java_dev_mdwn_pcmbank_PcmBank_jniOnUpdate(_env: JNIEnv, _class: JClass) {
    super::on_update();
}

#[no_mangle]
pub extern "system" fn Java_dev_mdwn_pcmbank_PcmBank_jniLoadSamples(
    mut env: JNIEnv,
    _class: JClass,
    files: JObjectArray,
) -> jboolean {
    match read_string_array(&mut env, &files) {
        Some(files) => flag(super::load_paths(&files)),
        None => JNI_FALSE,
    }
}

#[no_mangle]
pub extern "system" fn Java_dev_mdwn_pcmbank_PcmBank_jniPlaySample(
    _env: JNIEnv,
    _class: JClass,
    index: jint,
    play_state: jboolean,
) -> jboolean {
    let Ok(index) = usize::try_from(index) else {
        return JNI_FALSE;
    };
    flag(super::play_sample_at(index, play_state != JNI_FALSE))
}

#[no_mangle]
pub extern "system" fn Java_dev_mdwn_pcmbank_PcmBank_jniLastErrorCode(
    _env: JNIEnv,
    _class: JClass,
) -> jint {
    super::last_error_code()
}
