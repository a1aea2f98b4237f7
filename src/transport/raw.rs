use super::traits::CanEndpoint;
use crate::codec::{CAN_MTU, CanFilter, Frame, Timestamp, filter::validate_filters};
use crate::error::{Error, Result};

use log::{debug, info, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::ffi::CString;
use std::io::{self, ErrorKind, Read};
use std::mem::{self, size_of, size_of_val};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

const LOG_TARGET: &str = "canbridge::raw";

// get timestamp of the last received frame in a struct timeval (not exported by libc)
const SIOCGSTAMP: libc::c_ulong = 0x8906;

/// SocketCAN `CAN_RAW` endpoint.
///
/// The socket runs in non-blocking mode. Blocking receive is a `poll` over the
/// socket and an eventfd; [`close`](CanEndpoint::close) signals the eventfd so
/// a receiver parked in `poll` returns `Error::Closed`. The descriptors
/// themselves are released on drop, once nothing can still be polling them.
pub struct RawSocket {
    interface: String,
    if_index: u32,
    socket: Socket,
    wake: OwnedFd,
    closed: AtomicBool,
    timestamps: bool,
}

impl RawSocket {
    /// Resolve `interface`, open a raw CAN socket and bind it.
    ///
    /// With `with_timestamps`, `SO_TIMESTAMP` is requested once here; when the
    /// kernel refuses it, frames are simply delivered without timestamps.
    pub fn open(interface: &str, with_timestamps: bool) -> Result<Self> {
        let if_index = resolve_interface(interface)?;

        let socket = Socket::new(
            Domain::from(libc::AF_CAN),
            Type::RAW,
            Some(Protocol::from(libc::CAN_RAW)),
        )
        .map_err(Error::from_socket_setup)?;

        socket
            .bind(&can_sock_addr(if_index))
            .map_err(Error::from_socket_setup)?;
        socket.set_nonblocking(true)?;

        let timestamps = with_timestamps && enable_timestamps(&socket);
        if with_timestamps && !timestamps {
            warn!(target: LOG_TARGET, "{}: kernel timestamps unavailable, frames will carry none", interface);
        }

        let wake = new_eventfd()?;

        info!(
            target: LOG_TARGET,
            "Opened {} (index {}), timestamps {}",
            interface,
            if_index,
            if timestamps { "on" } else { "off" }
        );

        Ok(RawSocket {
            interface: interface.to_string(),
            if_index,
            socket,
            wake,
            closed: AtomicBool::new(false),
            timestamps,
        })
    }

    pub fn if_index(&self) -> u32 {
        self.if_index
    }

    fn wait_readable(&self) -> Result<()> {
        let mut fds = [
            libc::pollfd {
                fd: self.socket.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.wake.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        loop {
            let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if res >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Io(err));
        }

        if fds[1].revents != 0 || self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn last_timestamp(&self) -> io::Result<Timestamp> {
        let mut tv = libc::timeval { tv_sec: 0, tv_usec: 0 };
        let rv = unsafe {
            libc::ioctl(
                self.socket.as_raw_fd(),
                SIOCGSTAMP as _,
                &mut tv as *mut libc::timeval,
            )
        };
        if rv < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Timestamp::new(tv.tv_sec as u64, tv.tv_usec as u32))
    }
}

impl CanEndpoint for RawSocket {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn set_filters(&self, filters: &[CanFilter]) -> Result<()> {
        validate_filters(filters)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        // A zero-length option removes every filter, so nothing is received.
        let (optval, optlen) = if filters.is_empty() {
            (ptr::null(), 0)
        } else {
            (filters.as_ptr() as *const libc::c_void, size_of_val(filters))
        };
        let rv = unsafe {
            libc::setsockopt(
                self.socket.as_raw_fd(),
                libc::SOL_CAN_RAW,
                libc::CAN_RAW_FILTER,
                optval,
                optlen as libc::socklen_t,
            )
        };
        if rv < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINVAL) {
                return Err(Error::InvalidFilter(err.to_string()));
            }
            return Err(Error::Io(err));
        }

        debug!(target: LOG_TARGET, "{}: installed {} filter(s)", self.interface, filters.len());
        Ok(())
    }

    fn send(&self, frame: &Frame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let bytes = frame.to_bytes();
        match self.socket.send(&bytes) {
            Ok(n) if n == CAN_MTU => Ok(()),
            Ok(n) => Err(Error::Io(io::Error::new(
                ErrorKind::WriteZero,
                format!("short write of {} bytes", n),
            ))),
            Err(e) => Err(Error::from_send(e)),
        }
    }

    fn receive_blocking(&self) -> Result<Frame> {
        let mut buf = [0u8; CAN_MTU];
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::Closed);
            }
            self.wait_readable()?;

            match (&self.socket).read(&mut buf) {
                Ok(n) if n == CAN_MTU => {}
                Ok(n) => {
                    warn!(target: LOG_TARGET, "{}: dropping {} byte datagram", self.interface, n);
                    continue;
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => continue,
                Err(e) => {
                    if self.closed.load(Ordering::Acquire) {
                        return Err(Error::Closed);
                    }
                    return Err(Error::Io(e));
                }
            }

            let frame = match Frame::from_bytes(&buf) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(target: LOG_TARGET, "{}: {}", self.interface, e);
                    continue;
                }
            };
            if !self.timestamps {
                return Ok(frame);
            }
            return match self.last_timestamp() {
                Ok(ts) => Ok(frame.with_timestamp(ts)),
                Err(e) => {
                    debug!(target: LOG_TARGET, "{}: no timestamp for frame: {}", self.interface, e);
                    Ok(frame)
                }
            };
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let one: u64 = 1;
        let rv = unsafe {
            libc::write(
                self.wake.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                size_of::<u64>(),
            )
        };
        if rv < 0 {
            warn!(
                target: LOG_TARGET,
                "{}: failed to wake receiver: {}",
                self.interface,
                io::Error::last_os_error()
            );
        }
        debug!(target: LOG_TARGET, "{}: closed", self.interface);
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn timestamps_enabled(&self) -> bool {
        self.timestamps
    }
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

fn resolve_interface(name: &str) -> Result<u32> {
    if name.is_empty() || name.len() >= libc::IFNAMSIZ as usize {
        return Err(Error::NoSuchInterface(name.to_string()));
    }
    let c_name = CString::new(name).map_err(|_| Error::NoSuchInterface(name.to_string()))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(Error::NoSuchInterface(name.to_string()));
    }
    Ok(index)
}

fn can_sock_addr(if_index: u32) -> SockAddr {
    // Zeroed: the rx/tx id union is unused by CAN_RAW.
    let mut addr: libc::sockaddr_can = unsafe { mem::zeroed() };
    addr.can_family = libc::AF_CAN as libc::sa_family_t;
    addr.can_ifindex = if_index as libc::c_int;

    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    // sockaddr_storage is large enough and aligned for any socket address.
    unsafe {
        ptr::write(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_can, addr);
        SockAddr::new(storage, size_of::<libc::sockaddr_can>() as libc::socklen_t)
    }
}

fn enable_timestamps(socket: &Socket) -> bool {
    let on: libc::c_int = 1;
    let rv = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_TIMESTAMP,
            &on as *const libc::c_int as *const libc::c_void,
            size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    rv == 0
}

fn new_eventfd() -> io::Result<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
