//! Binary telemetry via the kernel driver's configuration buffer
//!
//! The driver hands back its live configuration through a
//! query-into-caller-buffer protocol: the first query uses a fixed-size
//! guess, and when the driver reports the buffer too small it also
//! reports the exact size required, which is retried once. A handle is
//! opened per read and never held across reads.

use crate::TelemetryReader;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use wgctl_proto::{aggregate, decode_peers, ticks_to_unix_millis, PeerStats, TunnelName};

/// Initial allocation for the first configuration query.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors raised by a single driver configuration query.
#[derive(Debug, Error)]
pub enum DriverQueryError {
    /// The supplied buffer cannot hold the configuration; `required` is
    /// the exact size the driver reported.
    #[error("configuration needs {required} bytes")]
    InsufficientBuffer { required: usize },

    #[error("driver i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// One open driver session for a tunnel. Dropping the handle releases it.
pub trait DriverHandle: Send {
    /// Fills `buf` with the current configuration and returns the number
    /// of valid bytes.
    fn query_configuration(&mut self, buf: &mut [u8]) -> Result<usize, DriverQueryError>;
}

/// Opens driver sessions by tunnel name.
pub trait DriverOpen: Send + Sync {
    type Handle: DriverHandle;

    fn open(&self, name: &TunnelName) -> io::Result<Self::Handle>;
}

#[derive(Debug, Error)]
enum ReadError {
    #[error("driver unavailable: {0}")]
    Open(#[source] io::Error),

    #[error(transparent)]
    Query(#[from] DriverQueryError),

    #[error(transparent)]
    Decode(#[from] wgctl_proto::DecodeError),
}

/// Telemetry reader over the driver's configuration buffer.
pub struct DriverReader<O: DriverOpen> {
    opener: Arc<O>,
}

impl<O: DriverOpen> DriverReader<O> {
    pub fn with_opener(opener: O) -> Self {
        Self {
            opener: Arc::new(opener),
        }
    }

    fn read_blocking(opener: &O, name: &TunnelName) -> Result<PeerStats, ReadError> {
        let mut handle = opener.open(name).map_err(ReadError::Open)?;

        let mut buf = vec![0u8; INITIAL_BUFFER_SIZE];
        let len = match handle.query_configuration(&mut buf) {
            Ok(len) => len,
            Err(DriverQueryError::InsufficientBuffer { required }) => {
                // Retry once at the exact size the driver reported; a
                // second refusal fails the read.
                buf.resize(required, 0);
                handle.query_configuration(&mut buf)?
            }
            Err(err) => return Err(err.into()),
        };

        let peers = decode_peers(&buf[..len.min(buf.len())])?;
        let totals = aggregate(&peers);
        Ok(PeerStats {
            rx_bytes: totals.rx_bytes,
            tx_bytes: totals.tx_bytes,
            last_handshake_millis: ticks_to_unix_millis(totals.last_handshake_ticks),
        })
    }
}

#[async_trait]
impl<O> TelemetryReader for DriverReader<O>
where
    O: DriverOpen + 'static,
{
    async fn read(&self, name: &TunnelName) -> PeerStats {
        // Driver queries are synchronous blocking calls; keep them off
        // the async executor threads.
        let opener = Arc::clone(&self.opener);
        let name = name.clone();
        let result =
            tokio::task::spawn_blocking(move || Self::read_blocking(&opener, &name)).await;
        match result {
            Ok(Ok(stats)) => stats,
            Ok(Err(err)) => {
                debug!(error = %err, "driver telemetry unavailable");
                PeerStats::default()
            }
            Err(err) => {
                warn!(error = %err, "driver telemetry task failed");
                PeerStats::default()
            }
        }
    }
}

/// Driver access through the installed tunnel driver's device interface.
#[cfg(windows)]
pub mod system {
    use super::{DriverHandle, DriverOpen, DriverQueryError, DriverReader};
    use std::ffi::c_void;
    use std::io;
    use std::iter::once;
    use std::ptr::{null, null_mut};
    use wgctl_proto::TunnelName;
    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, ERROR_MORE_DATA, GENERIC_READ, GENERIC_WRITE, HANDLE,
        INVALID_HANDLE_VALUE,
    };
    use windows_sys::Win32::Storage::FileSystem::{
        CreateFileW, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows_sys::Win32::System::IO::DeviceIoControl;

    // CTL_CODE(FILE_DEVICE_UNKNOWN, 0x800, METHOD_BUFFERED, FILE_READ_DATA)
    const IOCTL_GET_CONFIGURATION: u32 = (0x22 << 16) | (1 << 14) | (0x800 << 2);

    /// Opens `\\.\WireGuard\<name>` device handles.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemDriverOpen;

    pub struct SystemDriverHandle(HANDLE);

    // The handle is used from one thread at a time and closed exactly once.
    unsafe impl Send for SystemDriverHandle {}

    impl Drop for SystemDriverHandle {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    impl DriverOpen for SystemDriverOpen {
        type Handle = SystemDriverHandle;

        fn open(&self, name: &TunnelName) -> io::Result<SystemDriverHandle> {
            let path: Vec<u16> = format!(r"\\.\WireGuard\{name}")
                .encode_utf16()
                .chain(once(0))
                .collect();
            let handle = unsafe {
                CreateFileW(
                    path.as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    null(),
                    OPEN_EXISTING,
                    0,
                    null_mut(),
                )
            };
            if handle == INVALID_HANDLE_VALUE {
                return Err(io::Error::last_os_error());
            }
            Ok(SystemDriverHandle(handle))
        }
    }

    impl DriverHandle for SystemDriverHandle {
        fn query_configuration(&mut self, buf: &mut [u8]) -> Result<usize, DriverQueryError> {
            let mut bytes_returned: u32 = 0;
            let ok = unsafe {
                DeviceIoControl(
                    self.0,
                    IOCTL_GET_CONFIGURATION,
                    null_mut::<c_void>(),
                    0,
                    buf.as_mut_ptr().cast(),
                    buf.len() as u32,
                    &mut bytes_returned,
                    null_mut(),
                )
            };
            if ok != 0 {
                return Ok(bytes_returned as usize);
            }
            let last_error = unsafe { GetLastError() };
            if last_error == ERROR_MORE_DATA {
                return Err(DriverQueryError::InsufficientBuffer {
                    required: bytes_returned as usize,
                });
            }
            Err(DriverQueryError::Io(io::Error::from_raw_os_error(
                last_error as i32,
            )))
        }
    }

    impl DriverReader<SystemDriverOpen> {
        /// Reader wired to the installed driver.
        pub fn system() -> Self {
            Self::with_opener(SystemDriverOpen)
        }
    }
}
