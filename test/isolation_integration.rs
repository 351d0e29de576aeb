//! Isolated Call Integration Tests
//!
//! Native calls run in a forked child; crashes come back as errors.

#![cfg(unix)]

use native_bridge::ffi::{
    call, call_isolated, declare_c, load, Bridge, CallStatus, FfiError, FfiValue, MismatchKind,
};
use native_bridge::{BridgeConfig, Isolation};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn isolated_call_returns_like_in_process() {
    let process = load(None).unwrap();
    let strlen = declare_c(&process, "size_t strlen(const char* s)").unwrap();

    let args = [FfiValue::from("Hello from C!")];
    assert_eq!(
        call_isolated(&strlen, &args).unwrap(),
        call(&strlen, &args).unwrap()
    );

    let atof = declare_c(&process, "double atof(const char* nptr)").unwrap();
    assert_eq!(
        call_isolated(&atof, &["-1.25".into()]).unwrap(),
        FfiValue::F64(-1.25)
    );
}

#[test]
fn isolated_text_return_is_copied_back() {
    std::env::set_var("NATIVE_BRIDGE_ISOLATED_VALUE", "child text");
    let process = load(None).unwrap();
    let getenv = declare_c(&process, "char *getenv(const char *name)").unwrap();

    assert_eq!(
        call_isolated(&getenv, &["NATIVE_BRIDGE_ISOLATED_VALUE".into()]).unwrap(),
        FfiValue::Text("child text".to_string())
    );
    assert_eq!(
        call_isolated(&getenv, &["NATIVE_BRIDGE_ISOLATED_UNSET".into()]).unwrap(),
        FfiValue::Ptr(0)
    );
}

#[test]
fn abort_is_reported_as_signal() {
    let process = load(None).unwrap();
    let abort = declare_c(&process, "void abort(void)").unwrap();

    match call_isolated(&abort, &[]).unwrap_err() {
        FfiError::NativeCallError { function, status } => {
            assert_eq!(function, "abort");
            assert!(matches!(
                status,
                CallStatus::Signaled { ref signal, .. } if signal == "SIGABRT"
            ));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn exit_before_return_is_reported() {
    let process = load(None).unwrap();
    let exit = declare_c(&process, "void _exit(int status)").unwrap();

    match call_isolated(&exit, &[3i32.into()]).unwrap_err() {
        FfiError::NativeCallError { status, .. } => {
            assert_eq!(status, CallStatus::Exited(3));
        }
        other => panic!("unexpected error: {}", other),
    }

    // A clean exit without a reply is still an exit before returning
    match call_isolated(&exit, &[0i32.into()]).unwrap_err() {
        FfiError::NativeCallError { status, .. } => {
            assert_eq!(status, CallStatus::Exited(0));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn slow_neighbours_do_not_delay_a_reply() {
    let process = load(None).unwrap();
    let sleep = declare_c(&process, "unsigned int sleep(unsigned int seconds)").unwrap();
    let strlen = declare_c(&process, "size_t strlen(const char* s)").unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    // Children forked here inherit whichever result channels are open
    let sleepers: Vec<_> = (0..2)
        .map(|_| {
            let sleep = sleep.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    call_isolated(&sleep, &[2u32.into()]).unwrap();
                }
            })
        })
        .collect();

    for _ in 0..20 {
        let started = Instant::now();
        assert_eq!(
            call_isolated(&strlen, &["Hello from C!".into()]).unwrap(),
            FfiValue::USize(13)
        );
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "isolated call took {:?}",
            started.elapsed()
        );
    }

    stop.store(true, Ordering::Relaxed);
    for sleeper in sleepers {
        sleeper.join().unwrap();
    }
}

#[test]
fn argument_errors_surface_before_forking() {
    let process = load(None).unwrap();
    let strlen = declare_c(&process, "size_t strlen(const char* s)").unwrap();

    assert!(matches!(
        call_isolated(&strlen, &[]),
        Err(FfiError::ArgumentTypeMismatch {
            kind: MismatchKind::Arity { .. },
            ..
        })
    ));
}

#[test]
fn bridge_uses_configured_isolation() {
    let config = BridgeConfig::from_toml_str(
        r#"
[bridge]
isolation = "subprocess"

[[library]]
name = "c"
functions = ["void abort(void)", "int abs(int j)"]
"#,
    )
    .unwrap();

    let bridge = Bridge::from_config(&config).unwrap();
    assert_eq!(bridge.isolation(), Isolation::Subprocess);
    assert_eq!(
        bridge.call("c:abs", &[(-4i32).into()]).unwrap(),
        FfiValue::I32(4)
    );
    assert!(matches!(
        bridge.call("c:abort", &[]),
        Err(FfiError::NativeCallError { .. })
    ));
}
