//! Reusable scatter session.
//!
//! A session owns one device scatter handle for one target process. Its life
//! cycle is `Ready -> (Prepared -> Executed -> Ready)* -> Closed`; an
//! invalidated handle is noticed on next use and recreated.

use strum::Display;
use tracing::{debug, trace, warn};

use crate::config::AccessFlags;
use crate::endpoint::{Pid, RemoteEndpoint, ScatterHandle};
use crate::error::{Error, Result};

/// Session life cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    /// No live handle; the next use recreates one
    Uninitialized,
    Ready,
    Prepared,
    Executed,
    Closed,
}

pub struct ScatterSession<H> {
    handle: Option<H>,
    pid: Pid,
    flags: AccessFlags,
    prepared: usize,
    state: SessionState,
}

impl<H: ScatterHandle> ScatterSession<H> {
    /// Open a session against `endpoint`.
    pub fn initialize<E>(endpoint: &E, pid: Pid, flags: AccessFlags) -> Result<Self>
    where
        E: RemoteEndpoint<Scatter = H> + ?Sized,
    {
        let handle = endpoint
            .scatter_init(pid, flags)
            .ok_or(Error::ScatterInit { pid: pid.id() })?;
        debug!("Scatter session opened for pid {:?}", pid);

        Ok(Self {
            handle: Some(handle),
            pid,
            flags,
            prepared: 0,
            state: SessionState::Ready,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Number of ops prepared since the last clear
    pub fn prepared(&self) -> usize {
        self.prepared
    }

    /// Make sure a usable handle exists, recreating it if the old one was
    /// invalidated.
    pub fn ensure_ready<E>(&mut self, endpoint: &E) -> Result<()>
    where
        E: RemoteEndpoint<Scatter = H> + ?Sized,
    {
        if self.state == SessionState::Closed {
            return Err(Error::SessionClosed);
        }

        let valid = self.handle.as_ref().is_some_and(|h| h.is_valid());
        if !valid {
            if self.handle.is_some() {
                warn!("Scatter handle for pid {:?} invalidated, recreating", self.pid);
            }
            self.handle = None;
            self.prepared = 0;
            self.state = SessionState::Uninitialized;

            let handle = endpoint
                .scatter_init(self.pid, self.flags)
                .ok_or(Error::DeviceUnavailable { pid: self.pid.id() })?;
            self.handle = Some(handle);
            self.state = SessionState::Ready;
            debug!("Scatter session recreated for pid {:?}", self.pid);
        }

        Ok(())
    }

    fn handle_mut(&mut self) -> Result<&mut H> {
        match self.state {
            SessionState::Closed => Err(Error::SessionClosed),
            _ => self.handle.as_mut().ok_or(Error::DeviceUnavailable {
                pid: self.pid.id(),
            }),
        }
    }

    /// Queue one read. A rejection affects only this op.
    pub fn prepare_read(&mut self, address: u64, size: usize) -> Result<()> {
        let handle = self.handle_mut()?;
        if !handle.prepare_read(address, size) {
            trace!("Scatter rejected read at {:#x} ({} bytes)", address, size);
            return Err(Error::PrepareFailed { address, size });
        }
        self.prepared += 1;
        self.state = SessionState::Prepared;
        Ok(())
    }

    /// Queue one write. A rejection affects only this op.
    pub fn prepare_write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let handle = self.handle_mut()?;
        if !handle.prepare_write(address, data) {
            trace!("Scatter rejected write at {:#x} ({} bytes)", address, data.len());
            return Err(Error::PrepareFailed {
                address,
                size: data.len(),
            });
        }
        self.prepared += 1;
        self.state = SessionState::Prepared;
        Ok(())
    }

    /// Flush all prepared reads in one device call.
    ///
    /// Returns `false` only if the transfer call itself failed.
    pub fn execute_read(&mut self) -> bool {
        if self.prepared == 0 {
            return true;
        }
        let Ok(handle) = self.handle_mut() else {
            return false;
        };
        let ok = handle.execute_read();
        self.state = SessionState::Executed;
        ok
    }

    /// Flush all prepared writes in one device call.
    pub fn execute_write(&mut self) -> bool {
        if self.prepared == 0 {
            return true;
        }
        let Ok(handle) = self.handle_mut() else {
            return false;
        };
        let ok = handle.execute_write();
        self.state = SessionState::Executed;
        ok
    }

    /// Copy out the data of an executed read. Returns bytes delivered.
    pub fn read_prepared(&self, address: u64, buffer: &mut [u8]) -> usize {
        match &self.handle {
            Some(handle) if self.state == SessionState::Executed => handle.read(address, buffer),
            _ => 0,
        }
    }

    /// Reset prepared ops; required after every execute before reuse.
    pub fn clear(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(handle) = self.handle.as_mut()
            && !handle.clear(self.pid, self.flags)
        {
            warn!("Failed to clear scatter session for pid {:?}", self.pid);
        }
        self.prepared = 0;
        if self.handle.is_some() {
            self.state = SessionState::Ready;
        }
    }

    /// Release the device handle. The session cannot be used afterwards.
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!("Scatter session closed for pid {:?}", self.pid);
        }
        self.prepared = 0;
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::MockEndpointBuilder;

    const PID: u32 = 1234;

    #[test]
    fn test_initialize_rejected() {
        let endpoint = MockEndpointBuilder::new().pid(PID).build();
        endpoint.refuse_sessions(true);

        let result = ScatterSession::initialize(&endpoint, Pid::new(PID), AccessFlags::NONE);
        assert!(matches!(result, Err(Error::ScatterInit { pid: PID })));
    }

    #[test]
    fn test_prepare_execute_clear_cycle() {
        let endpoint = MockEndpointBuilder::new()
            .pid(PID)
            .map(0x1000, &[1, 2, 3, 4, 5, 6, 7, 8])
            .build();
        let mut session =
            ScatterSession::initialize(&endpoint, Pid::new(PID), AccessFlags::NONE).unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        session.prepare_read(0x1002, 4).unwrap();
        assert_eq!(session.state(), SessionState::Prepared);
        assert_eq!(session.prepared(), 1);

        assert!(session.execute_read());
        assert_eq!(session.state(), SessionState::Executed);

        let mut out = [0u8; 4];
        assert_eq!(session.read_prepared(0x1002, &mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);

        session.clear();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.prepared(), 0);
        assert_eq!(session.read_prepared(0x1002, &mut out), 0);
    }

    #[test]
    fn test_execute_without_ops_skips_device() {
        let endpoint = MockEndpointBuilder::new().pid(PID).build();
        let mut session =
            ScatterSession::initialize(&endpoint, Pid::new(PID), AccessFlags::NONE).unwrap();

        assert!(session.execute_read());
        assert_eq!(endpoint.execute_read_calls(), 0);
    }

    #[test]
    fn test_execute_failure_reported() {
        let endpoint = MockEndpointBuilder::new()
            .pid(PID)
            .map_zeroed(0x1000, 0x1000)
            .build();
        let mut session =
            ScatterSession::initialize(&endpoint, Pid::new(PID), AccessFlags::NONE).unwrap();
        endpoint.fail_next_executes(1);

        session.prepare_read(0x1000, 4).unwrap();
        assert!(!session.execute_read());
        session.clear();

        session.prepare_read(0x1000, 4).unwrap();
        assert!(session.execute_read());
    }

    #[test]
    fn test_prepare_rejection_is_local() {
        let endpoint = MockEndpointBuilder::new()
            .pid(PID)
            .map_zeroed(0x1000, 0x1000)
            .build();
        endpoint.reject_prepare(0x5000);
        let mut session =
            ScatterSession::initialize(&endpoint, Pid::new(PID), AccessFlags::NONE).unwrap();

        assert!(matches!(
            session.prepare_read(0x5000, 4),
            Err(Error::PrepareFailed { address: 0x5000, .. })
        ));
        session.prepare_read(0x1000, 4).unwrap();
        assert_eq!(session.prepared(), 1);
        assert!(session.execute_read());
    }

    #[test]
    fn test_invalidated_handle_recreated() {
        let endpoint = MockEndpointBuilder::new().pid(PID).build();
        let mut session =
            ScatterSession::initialize(&endpoint, Pid::new(PID), AccessFlags::NONE).unwrap();
        assert_eq!(endpoint.sessions_created(), 1);

        endpoint.invalidate_sessions();
        session.ensure_ready(&endpoint).unwrap();
        assert_eq!(endpoint.sessions_created(), 2);
        assert_eq!(session.state(), SessionState::Ready);

        // still valid, nothing to do
        session.ensure_ready(&endpoint).unwrap();
        assert_eq!(endpoint.sessions_created(), 2);
    }

    #[test]
    fn test_recreation_failure_is_device_unavailable() {
        let endpoint = MockEndpointBuilder::new().pid(PID).build();
        let mut session =
            ScatterSession::initialize(&endpoint, Pid::new(PID), AccessFlags::NONE).unwrap();

        endpoint.invalidate_sessions();
        endpoint.refuse_sessions(true);
        assert!(matches!(
            session.ensure_ready(&endpoint),
            Err(Error::DeviceUnavailable { pid: PID })
        ));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_closed_session_rejects_use() {
        let endpoint = MockEndpointBuilder::new().pid(PID).build();
        let mut session =
            ScatterSession::initialize(&endpoint, Pid::new(PID), AccessFlags::NONE).unwrap();

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.prepare_read(0x1000, 4), Err(Error::SessionClosed)));
        assert!(matches!(session.ensure_ready(&endpoint), Err(Error::SessionClosed)));
    }
}
