//! Isolated Calls
//!
//! Runs a native call in a forked child so a crash inside native code is
//! reported as an error with the child's exit or signal status instead of
//! taking the caller down.
//!
//! The child shares nothing back with the parent except the return value:
//! writes to process-global state stay in the child. Pointer results are
//! child addresses and only meaningful as numbers.

use super::error::{CallStatus, FfiError, FfiResult};
use super::signature::FunctionSignature;
use super::types::FfiValue;

fn native_call_error(signature: &FunctionSignature, status: CallStatus) -> FfiError {
    FfiError::NativeCallError {
        function: signature.name().to_string(),
        status,
    }
}

#[cfg(unix)]
mod imp {
    use std::array::TryFromSliceError;
    use std::ffi::c_void;
    use std::io::{self, Read};
    use std::os::fd::{AsRawFd, RawFd};
    use std::os::unix::net::UnixStream;

    use nix::errno::Errno;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult, Pid};
    use tracing::{debug, instrument, warn};

    use super::native_call_error;
    use crate::ffi::call::{build_cif, invoke_raw, RawReturn};
    use crate::ffi::error::{CallStatus, FfiResult};
    use crate::ffi::marshal::MarshaledArgs;
    use crate::ffi::signature::FunctionSignature;
    use crate::ffi::types::{FfiType, FfiValue};

    const WORD: usize = std::mem::size_of::<u64>();
    /// Return word followed by the length of the returned text
    const HEADER: usize = 2 * WORD;

    #[instrument(
        name = "ffi::call_isolated",
        level = "debug",
        skip_all,
        fields(function = %signature.name(), args = args.len())
    )]
    pub fn call_isolated(signature: &FunctionSignature, args: &[FfiValue]) -> FfiResult<FfiValue> {
        let prototype = signature.prototype();
        let return_type = prototype.return_type;

        // Everything that allocates happens before the fork
        let frame = MarshaledArgs::new(prototype, args)?;
        let cif = build_cif(prototype, &frame);
        let arg_list = frame.arg_list();
        let (mut reader, writer) = UnixStream::pair().map_err(|e| {
            native_call_error(
                signature,
                CallStatus::Unobservable(format!("cannot create result channel: {}", e)),
            )
        })?;

        flush_c_stdio();

        // Safety: the child only runs the prepared call, writes the result,
        // flushes C stdio and calls `_exit`. It never allocates.
        match unsafe { fork() } {
            Err(errno) => Err(native_call_error(
                signature,
                CallStatus::Unobservable(format!("fork failed: {}", errno)),
            )),
            Ok(ForkResult::Child) => {
                let raw = unsafe {
                    invoke_raw(&cif, signature.address(), return_type, arg_list.as_slice())
                };
                report(writer.as_raw_fd(), raw, return_type);
                flush_c_stdio();
                unsafe { libc::_exit(0) }
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = %child, "forked isolated call");
                drop(writer);

                let reply = read_reply(&mut reader);
                let status = reap(child);
                drop(arg_list);
                drop(frame);

                match (status, reply) {
                    (Ok(WaitStatus::Exited(_, 0)), Ok((word, text))) => {
                        let raw = RawReturn::from_word(word, return_type);
                        Ok(raw.decode(return_type, |_| {
                            String::from_utf8_lossy(&text).into_owned()
                        }))
                    }
                    (Ok(WaitStatus::Exited(_, code)), _) => {
                        warn!(code, "isolated call exited before returning");
                        Err(native_call_error(signature, CallStatus::Exited(code)))
                    }
                    (Ok(WaitStatus::Signaled(_, signal, core_dumped)), _) => {
                        warn!(signal = signal.as_str(), "isolated call terminated by signal");
                        Err(native_call_error(
                            signature,
                            CallStatus::Signaled {
                                signal: signal.as_str().to_string(),
                                core_dumped,
                            },
                        ))
                    }
                    (Ok(other), _) => Err(native_call_error(
                        signature,
                        CallStatus::Unobservable(format!("unexpected wait status {:?}", other)),
                    )),
                    (Err(errno), _) => Err(native_call_error(
                        signature,
                        CallStatus::Unobservable(format!("waitpid failed: {}", errno)),
                    )),
                }
            }
        }
    }

    fn reap(child: Pid) -> nix::Result<WaitStatus> {
        loop {
            match waitpid(child, None) {
                Err(Errno::EINTR) => continue,
                other => return other,
            }
        }
    }

    fn flush_c_stdio() {
        // Safety: fflush(NULL) flushes every open output stream.
        unsafe {
            libc::fflush(std::ptr::null_mut());
        }
    }

    /// Parent side: read the header, then exactly the announced text bytes.
    ///
    /// The reply is length-prefixed so a writer end inherited by some other
    /// forked process cannot hold the read open past the reply.
    fn read_reply(reader: &mut UnixStream) -> io::Result<(u64, Vec<u8>)> {
        let mut header = [0u8; HEADER];
        reader.read_exact(&mut header)?;
        let (word, len) = header.split_at(WORD);
        let word = u64::from_ne_bytes(word.try_into().map_err(invalid_header)?);
        let len = u64::from_ne_bytes(len.try_into().map_err(invalid_header)?);

        let mut text = vec![0u8; len as usize];
        reader.read_exact(&mut text)?;
        Ok((word, text))
    }

    fn invalid_header(e: TryFromSliceError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }

    /// Child side: send the raw return word and the text length, then the
    /// bytes of a returned C string.
    fn report(fd: RawFd, raw: RawReturn, return_type: FfiType) {
        let text = match (return_type, raw) {
            (FfiType::CStr, RawReturn::Word(addr)) if addr != 0 => {
                let ptr = addr as usize as *const libc::c_char;
                // Safety: a non-null `char*` result is a C string by declaration.
                let len = unsafe { libc::strlen(ptr) };
                Some((ptr as *const c_void, len))
            }
            _ => None,
        };
        let text_len = text.map_or(0, |(_, len)| len);

        let mut header = [0u8; HEADER];
        header[..WORD].copy_from_slice(&raw.to_word().to_ne_bytes());
        header[WORD..].copy_from_slice(&(text_len as u64).to_ne_bytes());
        if !write_all(fd, header.as_ptr() as *const c_void, header.len()) {
            return;
        }

        if let Some((ptr, len)) = text {
            write_all(fd, ptr, len);
        }
    }

    fn write_all(fd: RawFd, mut buf: *const c_void, mut len: usize) -> bool {
        while len > 0 {
            // Safety: `buf` points at `len` readable bytes.
            let n = unsafe { libc::write(fd, buf, len) };
            if n < 0 {
                if Errno::last() == Errno::EINTR {
                    continue;
                }
                return false;
            }
            let n = n as usize;
            // Safety: advancing within the same buffer.
            buf = unsafe { (buf as *const u8).add(n) } as *const c_void;
            len -= n;
        }
        true
    }
}

/// Call a declared function in a forked child process.
///
/// Arguments are checked and marshaled in the caller exactly as for
/// [`call`](super::call). If the child dies before returning, the error is
/// a [`FfiError::NativeCallError`] carrying its exit code or signal.
#[cfg(unix)]
pub fn call_isolated(signature: &FunctionSignature, args: &[FfiValue]) -> FfiResult<FfiValue> {
    imp::call_isolated(signature, args)
}

/// Call a declared function in a forked child process.
///
/// Not available on this platform.
#[cfg(not(unix))]
pub fn call_isolated(signature: &FunctionSignature, _args: &[FfiValue]) -> FfiResult<FfiValue> {
    Err(native_call_error(
        signature,
        CallStatus::Unobservable("process isolation requires a unix platform".to_string()),
    ))
}
