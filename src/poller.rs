//! Single-waiter multiplexing over device fds plus a self-pipe wakeup.
//!
//! One epoll instance covers every trigger-mode device fd. A `socketpair`
//! is registered alongside them under the sentinel token
//! [`INVALID_DEV_NUM`]: a control-plane write of one byte to the far end
//! makes an in-flight [`Poller::wait`] return immediately, so a newly
//! computed timeout, fd set or channel layout takes effect on the next
//! loop iteration.
//!
//! Registration and removal are safe to perform from another thread while a
//! wait is in flight; that property is what makes live sensor addition work.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use tracing::warn;

use crate::sensor::MAX_DEVICES;

/// Sentinel device number carried by the wakeup fd.
pub const INVALID_DEV_NUM: u32 = u32::MAX;

const WAKE_TOKEN: u64 = INVALID_DEV_NUM as u64;

/// One readiness notification from [`Poller::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitEvent {
    /// Device number the fd was registered under, or [`INVALID_DEV_NUM`]
    /// for the wakeup pair.
    pub dev_num: u32,
}

/// Epoll instance plus the wakeup socketpair.
#[derive(Debug)]
pub struct Poller {
    epoll: OwnedFd,
    /// Read side, registered with epoll under [`WAKE_TOKEN`].
    wake_rx: OwnedFd,
    /// Write side, poked by control-plane calls.
    wake_tx: OwnedFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let epoll = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: epoll is a freshly created fd we now own.
        let epoll = unsafe { OwnedFd::from_raw_fd(epoll) };

        let mut pair = [0 as RawFd; 2];
        let rc = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                0,
                pair.as_mut_ptr(),
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: both ends are freshly created fds we now own.
        let wake_rx = unsafe { OwnedFd::from_raw_fd(pair[0]) };
        let wake_tx = unsafe { OwnedFd::from_raw_fd(pair[1]) };

        let poller = Self {
            epoll,
            wake_rx,
            wake_tx,
        };
        poller.ctl_add(poller.wake_rx.as_raw_fd(), WAKE_TOKEN)?;
        Ok(poller)
    }

    fn ctl_add(&self, fd: RawFd, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: token,
        };
        let rc = unsafe {
            libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Start watching a device fd for readable reports.
    pub fn add(&self, fd: RawFd, dev_num: u32) -> io::Result<()> {
        self.ctl_add(fd, u64::from(dev_num))
    }

    /// Stop watching a device fd. A no-op when the fd was never registered.
    pub fn remove(&self, fd: RawFd) {
        let rc = unsafe {
            libc::epoll_ctl(
                self.epoll.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                warn!(fd, error = %err, "failed to remove fd from wait set");
            }
        }
    }

    /// Block until at least one watched fd is readable or the timeout
    /// expires. `None` waits forever. Fills `events`; an expired timeout
    /// leaves it empty.
    pub fn wait(&self, events: &mut Vec<WaitEvent>, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();

        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let mut raw = [libc::epoll_event { events: 0, u64: 0 }; MAX_DEVICES + 1];
        let n = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                raw.as_mut_ptr(),
                raw.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        for ev in &raw[..n as usize] {
            if ev.events & libc::EPOLLIN as u32 != 0 {
                events.push(WaitEvent {
                    dev_num: if ev.u64 == WAKE_TOKEN {
                        INVALID_DEV_NUM
                    } else {
                        ev.u64 as u32
                    },
                });
            }
        }
        Ok(())
    }

    /// Release an in-flight wait by writing one byte to the wakeup pair.
    pub fn wake(&self) {
        let buf = [0u8; 1];
        let n = unsafe { libc::write(self.wake_tx.as_raw_fd(), buf.as_ptr().cast(), 1) };
        if n != 1 {
            warn!(error = %io::Error::last_os_error(), "failed to write wakeup byte");
        }
    }

    /// Consume one wakeup byte after the waiter reported the sentinel token.
    pub fn drain_wakeup(&self) {
        let mut buf = [0u8; 1];
        let n = unsafe { libc::read(self.wake_rx.as_raw_fd(), buf.as_mut_ptr().cast(), 1) };
        if n != 1 {
            warn!(error = %io::Error::last_os_error(), "failed to drain wakeup byte");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn timeout_expires_with_empty_event_set() {
        let poller = Poller::new().unwrap();
        let mut events = Vec::new();
        let start = Instant::now();
        poller
            .wait(&mut events, Some(Duration::from_millis(20)))
            .unwrap();
        assert!(events.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wake_interrupts_wait_with_sentinel_token() {
        let poller = Poller::new().unwrap();
        poller.wake();
        let mut events = Vec::new();
        poller.wait(&mut events, None).unwrap();
        assert_eq!(events, vec![WaitEvent {
            dev_num: INVALID_DEV_NUM
        }]);
        poller.drain_wakeup();

        // Drained: the next wait times out instead of reporting the pair.
        poller
            .wait(&mut events, Some(Duration::from_millis(5)))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn wake_from_another_thread_releases_wait() {
        let poller = std::sync::Arc::new(Poller::new().unwrap());
        let waker = poller.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            waker.wake();
        });
        let mut events = Vec::new();
        poller.wait(&mut events, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].dev_num, INVALID_DEV_NUM);
        poller.drain_wakeup();
        handle.join().unwrap();
    }

    #[test]
    fn registered_pipe_reports_its_device_number() {
        let poller = Poller::new().unwrap();
        let mut pair = [0 as RawFd; 2];
        let rc = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                0,
                pair.as_mut_ptr(),
            )
        };
        assert_eq!(rc, 0);
        let rx = unsafe { OwnedFd::from_raw_fd(pair[0]) };
        let tx = unsafe { OwnedFd::from_raw_fd(pair[1]) };

        poller.add(rx.as_raw_fd(), 3).unwrap();
        let buf = [0u8; 1];
        unsafe { libc::write(tx.as_raw_fd(), buf.as_ptr().cast(), 1) };

        let mut events = Vec::new();
        poller.wait(&mut events, Some(Duration::from_millis(100))).unwrap();
        assert_eq!(events, vec![WaitEvent { dev_num: 3 }]);

        poller.remove(rx.as_raw_fd());
        // Removing twice is tolerated.
        poller.remove(rx.as_raw_fd());
    }
}
