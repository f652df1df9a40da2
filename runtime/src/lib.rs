extern crate alloc;

use alloc::collections::VecDeque;
use core::cell::RefCell;
use core::time::Duration;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};

use log::error;
use stakker::Fwd;

mod logger;
mod rt;
pub mod time;

pub use logger::Logger;
pub use rt::*;

#[cfg(target_family = "unix")]
mod sys {
	pub use std::os::fd::{AsRawFd, RawFd};

	pub use libc::{poll, pollfd as Poll, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_fd()
	}
}

#[cfg(target_family = "windows")]
mod sys {
	pub use std::os::windows::io::AsRawSocket as AsRawFd;

	pub use windows_sys::Win32::Networking::WinSock::{
		WSAPoll as poll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM as POLLIN, POLLWRNORM as POLLOUT, SOCKET as RawFd, WSAPOLLFD as Poll,
	};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_socket() as _
	}
}

use sys::*;
use utils::error::*;

const DATAGRAM_CAP: usize = 1500;

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

/// Attempts one non-blocking send. Returns `Ok(false)` on `WouldBlock` so the caller can queue the datagram.
fn send(socket: &UdpSocket, addr: SocketAddr, buf: &[u8]) -> Result<bool> {
	match socket.send_to(buf, addr) {
		Ok(n) if n == buf.len() => Ok(true),
		Ok(n) => {
			error!("Only sent {}/{} bytes to {addr}", n, buf.len());
			Err(())
		}
		Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(false),
		Err(err) => {
			error!("Failed to send datagram to {addr}: {err}");
			Err(())
		}
	}
}

/// Attempts one non-blocking receive. Returns `Ok(None)` on `WouldBlock`.
fn recv(socket: &UdpSocket) -> Result<Option<(SocketAddr, Vec<u8>)>> {
	let mut buf = vec![0u8; DATAGRAM_CAP];

	match socket.recv_from(&mut buf) {
		Ok((n, addr)) => {
			buf.truncate(n);
			Ok(Some((addr, buf)))
		}
		Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
		Err(err) => {
			error!("Failed to receive datagram: {err}");
			Err(())
		}
	}
}

thread_local! {
	static GLOBAL: RefCell<State> = const {
		RefCell::new(State {
			fds: Vec::new(),
			entries: Vec::new()
		})
	};
}

struct State {
	fds: Vec<Poll>,
	entries: Vec<Entry>,
}

impl State {
	fn with<X, F: FnOnce(&mut Self) -> X>(f: F) -> X {
		GLOBAL.with(|x| f(&mut x.borrow_mut()))
	}

	/// Returns whether any more I/O is waiting.
	fn is_io(&self) -> bool {
		!self.fds.is_empty()
	}

	/// Poll the fds. Returns whether any file descriptors are ready for I/O.
	fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
		let ret = unsafe {
			poll(
				self.fds.as_mut_ptr(),
				self.fds.len().try_into().expect("Fewer than u32::MAX fds"),
				as_timeout(timeout),
			)
		};

		let mut pending: u32 = ret.try_into().map_err(|_| error!("poll() failed: {}", io::Error::last_os_error()))?;

		if pending == 0 {
			return Ok(false);
		}

		for idx in 0.. {
			let Poll { fd, events, revents } = &mut self.fds[idx];
			let entry = &mut self.entries[idx];

			if *revents == 0 {
				continue;
			}

			if *revents & POLLERR != 0 {
				panic!("Socket error while polling");
			}

			if *revents & POLLHUP != 0 {
				panic!("Socket hangup");
			}

			if *revents & POLLNVAL != 0 {
				panic!("Socket invalid");
			}

			if *revents & POLLIN != 0 {
				entry.flush_read()?;
			}

			if *revents & POLLOUT != 0 {
				entry.flush_write()?;
			};

			let _ = fd;

			*events = POLLIN;

			if !entry.queue.is_empty() {
				*events |= POLLOUT;
			}

			*revents = 0;

			pending -= 1;

			if pending == 0 {
				break;
			}
		}

		Ok(true)
	}
}

struct Entry {
	socket: UdpSocket,
	fwd: Fwd<(SocketAddr, Vec<u8>)>,
	queue: VecDeque<(SocketAddr, Vec<u8>)>,
}

impl Entry {
	fn flush_read(&mut self) -> Result {
		while let Some(datagram) = recv(&self.socket)? {
			self.fwd.fwd(datagram);
		}

		Ok(())
	}

	fn flush_write(&mut self) -> Result {
		assert!(!self.queue.is_empty());

		loop {
			let Some((addr, buf)) = self.queue.back() else { return Ok(()) };

			if !send(&self.socket, *addr, buf)? {
				return Ok(());
			}

			self.queue.pop_back();
		}
	}
}

/// A non-blocking UDP socket registered with the process-wide poll() reactor.
///
/// Delivers received `(source address, datagram)` pairs through `fwd`, and queues outgoing
/// datagrams that would otherwise block the event loop.
pub struct Io {
	socket_fd: RawFd,
}

impl Io {
	pub fn new(socket: UdpSocket, fwd: Fwd<(SocketAddr, Vec<u8>)>) -> Result<Self> {
		socket.set_nonblocking(true).map_err(|err| error!("Failed to set socket non-blocking: {err}"))?;

		let socket_fd = as_raw(&socket);

		State::with(|i| {
			i.fds.push(Poll { fd: socket_fd, events: POLLIN, revents: 0 });
			i.entries.push(Entry { socket, fwd, queue: VecDeque::new() });
		});

		Ok(Self { socket_fd })
	}

	/// Sends a datagram, queuing it for later delivery if the socket buffer is full.
	pub fn write(&self, addr: SocketAddr, buf: Vec<u8>) -> Result {
		State::with(|i| {
			let idx = i.fds.iter().position(|f| f.fd == self.socket_fd).expect("Socket is present");

			if !i.entries[idx].queue.is_empty() || !send(&i.entries[idx].socket, addr, &buf)? {
				i.entries[idx].queue.push_front((addr, buf));
				i.fds[idx].events |= POLLOUT;
			}

			Ok(())
		})
	}
}

impl Drop for Io {
	fn drop(&mut self) {
		State::with(|i| {
			let idx = i.fds.iter().position(|f| f.fd == self.socket_fd).expect("Socket is present");
			i.entries.swap_remove(idx);
			i.fds.swap_remove(idx);
		})
	}
}
