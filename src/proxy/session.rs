use crate::comm::wire::Channel;
use crate::error::Error;
use crate::protocol::StopEvent;
use indexmap::IndexMap;
use std::net::TcpListener;

/// Handle of a debugging session, `0` stands for the last used session.
pub type SessionHandle = u32;

/// One proxy-side debugging session.
pub struct Session {
    /// Connection to the target, absent while waiting for a global breakpoint.
    pub chan: Option<Channel>,
    /// Listener waiting for targets hitting our global breakpoints.
    pub listener: Option<(TcpListener, u16)>,
    /// First stop event, read while attaching and delivered once.
    pub pending: Option<StopEvent>,
    /// Pid of the connected target, if known.
    pub target_pid: Option<i32>,
}

impl Session {
    pub fn connected(chan: Channel, pending: Option<StopEvent>) -> Self {
        Self {
            chan: Some(chan),
            listener: None,
            pending,
            target_pid: None,
        }
    }

    pub fn listening(listener: TcpListener, port: u16) -> Self {
        Self {
            chan: None,
            listener: Some((listener, port)),
            pending: None,
            target_pid: None,
        }
    }

    pub fn channel(&mut self) -> Result<&mut Channel, Error> {
        self.chan.as_mut().ok_or(Error::ConnectionClosed)
    }

    pub fn listener_port(&self) -> Option<u16> {
        self.listener.as_ref().map(|(_, port)| *port)
    }
}

/// Sessions of one proxy process.
#[derive(Default)]
pub struct SessionTable {
    sessions: IndexMap<SessionHandle, Session>,
    next: SessionHandle,
    last_used: Option<SessionHandle>,
}

impl SessionTable {
    /// Register a session and make it the last used one.
    pub fn add(&mut self, session: Session) -> Result<SessionHandle, Error> {
        let handle = self
            .next
            .checked_add(1)
            .ok_or(Error::NoFreeSessionHandle)?;
        self.next = handle;
        self.sessions.insert(handle, session);
        self.last_used = Some(handle);
        Ok(handle)
    }

    fn resolve(&self, handle: SessionHandle) -> Result<SessionHandle, Error> {
        let handle = match handle {
            0 => self.last_used.ok_or(Error::InvalidSession)?,
            h => h,
        };
        if self.sessions.contains_key(&handle) {
            Ok(handle)
        } else {
            Err(Error::InvalidSession)
        }
    }

    /// Find a session, handle `0` means the last used session.
    pub fn get_mut(&mut self, handle: SessionHandle) -> Result<(SessionHandle, &mut Session), Error> {
        let handle = self.resolve(handle)?;
        self.last_used = Some(handle);
        let session = self
            .sessions
            .get_mut(&handle)
            .ok_or(Error::InvalidSession)?;
        Ok((handle, session))
    }

    pub fn remove(&mut self, handle: SessionHandle) -> Result<Session, Error> {
        let handle = self.resolve(handle)?;
        if self.last_used == Some(handle) {
            self.last_used = None;
        }
        self.sessions
            .shift_remove(&handle)
            .ok_or(Error::InvalidSession)
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (SessionHandle, Session)> + '_ {
        self.last_used = None;
        self.sessions.drain(..)
    }

    pub fn handles(&self) -> impl Iterator<Item = SessionHandle> + '_ {
        self.sessions.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionHandle, &Session)> + '_ {
        self.sessions.iter().map(|(h, s)| (*h, s))
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.resolve(handle).is_ok()
    }

    pub fn last_used(&self) -> Option<SessionHandle> {
        self.last_used
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::rendezvous::loopback_listener;

    fn session() -> Session {
        let (listener, port) = loopback_listener().unwrap();
        Session::listening(listener, port)
    }

    #[test]
    fn test_handles_are_sequential() {
        let mut table = SessionTable::default();
        assert_eq!(table.add(session()).unwrap(), 1);
        assert_eq!(table.add(session()).unwrap(), 2);
        assert_eq!(table.add(session()).unwrap(), 3);
        assert_eq!(table.handles().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_is_last_used() {
        let mut table = SessionTable::default();
        assert!(matches!(table.get_mut(0), Err(Error::InvalidSession)));

        let first = table.add(session()).unwrap();
        let second = table.add(session()).unwrap();
        assert_eq!(table.get_mut(0).unwrap().0, second);

        table.get_mut(first).unwrap();
        assert_eq!(table.get_mut(0).unwrap().0, first);
    }

    #[test]
    fn test_unknown_handle() {
        let mut table = SessionTable::default();
        table.add(session()).unwrap();
        assert!(matches!(table.get_mut(7), Err(Error::InvalidSession)));
        assert!(matches!(table.remove(7), Err(Error::InvalidSession)));
        // a failed lookup does not change the default session
        assert_eq!(table.get_mut(0).unwrap().0, 1);
    }

    #[test]
    fn test_remove_last_used() {
        let mut table = SessionTable::default();
        let h = table.add(session()).unwrap();
        table.remove(0).unwrap();
        assert!(table.is_empty());
        assert!(matches!(table.get_mut(h), Err(Error::InvalidSession)));
        assert!(matches!(table.get_mut(0), Err(Error::InvalidSession)));
    }
}
