use std::sync::OnceLock;

use p4fusion_engine::ShutdownFlag;

static FLAG: OnceLock<ShutdownFlag> = OnceLock::new();

/// Route SIGINT/SIGTERM into the engine's shutdown flag. A second signal
/// while a drain is already in progress exits immediately.
pub fn install(flag: ShutdownFlag) {
    let _ = FLAG.set(flag);
    unsafe {
        libc::signal(
            libc::SIGINT,
            handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGTERM,
            handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

extern "C" fn handle_signal(_signal: libc::c_int) {
    // Only async-signal-safe work here: an atomic store, or _exit.
    if let Some(flag) = FLAG.get() {
        if flag.is_set() {
            unsafe { libc::_exit(130) };
        }
        flag.request();
    }
}
