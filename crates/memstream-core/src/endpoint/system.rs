//! Endpoint backed by the operating system's process memory APIs.
//!
//! Windows goes through `ReadProcessMemory`/`WriteProcessMemory`, Linux through
//! `/proc/<pid>/mem`. Neither has a native scatter primitive, so a scatter
//! session here replays its prepared ops one by one on execute. Kernel memory
//! is not reachable through either.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tracing::{debug, trace, warn};

use super::{Pid, RemoteEndpoint, ScatterHandle};
use crate::config::AccessFlags;
use crate::error::{Error, Result};

#[derive(Default)]
struct Inner {
    processes: Mutex<HashMap<u32, Arc<os::OsProcess>>>,
}

/// Local process memory access, with open handles cached per pid.
#[derive(Clone, Default)]
pub struct SystemEndpoint {
    inner: Arc<Inner>,
}

impl SystemEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide endpoint shared by every caller.
    pub fn shared() -> &'static SystemEndpoint {
        static SHARED: OnceLock<SystemEndpoint> = OnceLock::new();
        SHARED.get_or_init(SystemEndpoint::new)
    }

    /// Open `pid` now, reporting why it cannot be accessed.
    pub fn open(&self, pid: Pid) -> Result<()> {
        self.process(pid).map(|_| ())
    }

    /// Drop the cached handle of `pid`, if any.
    pub fn release(&self, pid: Pid) {
        let mut processes = self
            .inner
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if processes.remove(&pid.id()).is_some() {
            debug!("Released handle for pid {}", pid);
        }
    }

    fn process(&self, pid: Pid) -> Result<Arc<os::OsProcess>> {
        if pid.is_kernel_memory() {
            return Err(Error::ProcessOpenFailed {
                pid: pid.id(),
                message: "kernel memory is not accessible".to_string(),
            });
        }

        let mut processes = self
            .inner
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(process) = processes.get(&pid.id()) {
            if process.is_alive() {
                return Ok(Arc::clone(process));
            }
            debug!("Cached handle for pid {} is stale, reopening", pid);
            processes.remove(&pid.id());
        }

        let process = os::OsProcess::open(pid.id()).map_err(|e| Error::ProcessOpenFailed {
            pid: pid.id(),
            message: e.to_string(),
        })?;
        let process = Arc::new(process);
        processes.insert(pid.id(), Arc::clone(&process));
        debug!("Opened pid {}", pid);
        Ok(process)
    }
}

impl RemoteEndpoint for SystemEndpoint {
    type Scatter = SystemScatter;

    fn scatter_init(&self, pid: Pid, _flags: AccessFlags) -> Option<SystemScatter> {
        match self.process(pid) {
            Ok(process) => Some(SystemScatter {
                process,
                reads: Vec::new(),
                writes: Vec::new(),
                results: HashMap::new(),
            }),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn read(&self, pid: Pid, address: u64, buffer: &mut [u8], _flags: AccessFlags) -> usize {
        match self.process(pid) {
            Ok(process) => process.read(address, buffer),
            Err(e) => {
                trace!("{}", e);
                0
            }
        }
    }

    fn write(&self, pid: Pid, address: u64, data: &[u8]) -> bool {
        match self.process(pid) {
            Ok(process) => process.write(address, data),
            Err(e) => {
                trace!("{}", e);
                false
            }
        }
    }
}

/// Emulated scatter session over one open process
pub struct SystemScatter {
    process: Arc<os::OsProcess>,
    reads: Vec<(u64, usize)>,
    writes: Vec<(u64, Vec<u8>)>,
    results: HashMap<u64, Vec<u8>>,
}

impl ScatterHandle for SystemScatter {
    fn prepare_read(&mut self, address: u64, size: usize) -> bool {
        if address == 0 || size == 0 {
            return false;
        }
        self.reads.push((address, size));
        true
    }

    fn prepare_write(&mut self, address: u64, data: &[u8]) -> bool {
        if address == 0 || data.is_empty() {
            return false;
        }
        self.writes.push((address, data.to_vec()));
        true
    }

    fn execute_read(&mut self) -> bool {
        for &(address, size) in &self.reads {
            let mut data = vec![0u8; size];
            let read = self.process.read(address, &mut data);
            data.truncate(read);
            self.results.insert(address, data);
        }
        true
    }

    fn execute_write(&mut self) -> bool {
        let mut all_written = true;
        for (address, data) in &self.writes {
            all_written &= self.process.write(*address, data);
        }
        all_written
    }

    fn read(&self, address: u64, buffer: &mut [u8]) -> usize {
        let Some(data) = self.results.get(&address) else {
            return 0;
        };
        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        len
    }

    fn clear(&mut self, _pid: Pid, _flags: AccessFlags) -> bool {
        self.reads.clear();
        self.writes.clear();
        self.results.clear();
        true
    }

    fn is_valid(&self) -> bool {
        self.process.is_alive()
    }
}

#[cfg(target_os = "windows")]
mod os {
    use std::ffi::c_void;

    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_VM_OPERATION,
        PROCESS_VM_READ, PROCESS_VM_WRITE,
    };

    const STILL_ACTIVE: u32 = 0x103;

    pub struct OsProcess {
        // Stored as an integer so the handle can be shared across threads
        raw: isize,
    }

    impl OsProcess {
        pub fn open(pid: u32) -> std::io::Result<Self> {
            // SAFETY: OpenProcess has no memory-safety preconditions.
            let handle = unsafe {
                OpenProcess(
                    PROCESS_VM_READ
                        | PROCESS_VM_WRITE
                        | PROCESS_VM_OPERATION
                        | PROCESS_QUERY_LIMITED_INFORMATION,
                    false,
                    pid,
                )
            }
            .map_err(std::io::Error::other)?;
            Ok(Self {
                raw: handle.0 as isize,
            })
        }

        fn handle(&self) -> HANDLE {
            HANDLE(self.raw as *mut c_void)
        }

        pub fn read(&self, address: u64, buffer: &mut [u8]) -> usize {
            let mut read = 0usize;
            // SAFETY: buffer is valid for buffer.len() bytes; a failed call
            // still reports how many bytes were copied.
            let _ = unsafe {
                ReadProcessMemory(
                    self.handle(),
                    address as *const c_void,
                    buffer.as_mut_ptr().cast(),
                    buffer.len(),
                    Some(&mut read as *mut usize),
                )
            };
            read.min(buffer.len())
        }

        pub fn write(&self, address: u64, data: &[u8]) -> bool {
            let mut written = 0usize;
            // SAFETY: data is valid for data.len() bytes.
            let result = unsafe {
                WriteProcessMemory(
                    self.handle(),
                    address as *const c_void,
                    data.as_ptr().cast(),
                    data.len(),
                    Some(&mut written as *mut usize),
                )
            };
            result.is_ok() && written == data.len()
        }

        pub fn is_alive(&self) -> bool {
            let mut code = 0u32;
            // SAFETY: the handle stays open for the lifetime of self.
            let result = unsafe { GetExitCodeProcess(self.handle(), &mut code) };
            result.is_ok() && code == STILL_ACTIVE
        }
    }

    impl Drop for OsProcess {
        fn drop(&mut self) {
            // SAFETY: the handle was returned by OpenProcess and is closed once.
            let _ = unsafe { CloseHandle(self.handle()) };
        }
    }
}

#[cfg(target_os = "linux")]
mod os {
    use std::fs::{File, OpenOptions};
    use std::io::ErrorKind;
    use std::os::unix::fs::FileExt;
    use std::path::PathBuf;

    pub struct OsProcess {
        root: PathBuf,
        mem: File,
    }

    impl OsProcess {
        pub fn open(pid: u32) -> std::io::Result<Self> {
            let root = PathBuf::from(format!("/proc/{}", pid));
            let mem = OpenOptions::new()
                .read(true)
                .write(true)
                .open(root.join("mem"))
                .or_else(|_| File::open(root.join("mem")))?;
            Ok(Self { root, mem })
        }

        pub fn read(&self, address: u64, buffer: &mut [u8]) -> usize {
            let mut done = 0;
            while done < buffer.len() {
                match self.mem.read_at(&mut buffer[done..], address + done as u64) {
                    Ok(0) => break,
                    Ok(n) => done += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            done
        }

        pub fn write(&self, address: u64, data: &[u8]) -> bool {
            self.mem.write_all_at(data, address).is_ok()
        }

        pub fn is_alive(&self) -> bool {
            self.root.exists()
        }
    }
}

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
mod os {
    pub struct OsProcess;

    impl OsProcess {
        pub fn open(_pid: u32) -> std::io::Result<Self> {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "process memory access is not supported on this platform",
            ))
        }

        pub fn read(&self, _address: u64, _buffer: &mut [u8]) -> usize {
            0
        }

        pub fn write(&self, _address: u64, _data: &[u8]) -> bool {
            false
        }

        pub fn is_alive(&self) -> bool {
            false
        }
    }
}
