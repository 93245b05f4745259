//! Descriptor passing over Unix sockets via `SCM_RIGHTS`
//!
//! The daemon's reply is a single `sendmsg`: the JSON payload as data and
//! the client pipe ends as ancillary rights. Received descriptors are
//! close-on-exec.

#![allow(unsafe_code)]

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use nsexec_core::FD_COUNT;

/// Send `payload` with `fds` attached; returns the number of payload bytes sent
///
/// The rights travel with the first byte, so a short send still delivers
/// every descriptor.
///
/// # Errors
/// Returns error if `sendmsg` fails
pub fn send_with_fds(socket: RawFd, payload: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    let iov = [IoSlice::new(payload)];
    let rights = [ControlMessage::ScmRights(fds)];
    let cmsgs: &[ControlMessage<'_>] = if fds.is_empty() { &[] } else { &rights };

    sendmsg::<()>(socket, &iov, cmsgs, MsgFlags::MSG_NOSIGNAL, None).map_err(io::Error::from)
}

/// Receive data and any attached descriptors
///
/// Accepts at most [`FD_COUNT`] descriptors; a message whose rights were
/// truncated is an error, and whatever did arrive is closed.
///
/// # Errors
/// Returns error if `recvmsg` fails or the control data was truncated
pub fn recv_with_fds(socket: RawFd, buf: &mut [u8]) -> io::Result<(usize, Vec<OwnedFd>)> {
    let mut iov = [IoSliceMut::new(buf)];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; FD_COUNT]);

    let msg = recvmsg::<()>(
        socket,
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::MSG_CMSG_CLOEXEC,
    )
    .map_err(io::Error::from)?;

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs().map_err(io::Error::from)? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            // SAFETY: the kernel just installed these descriptors for us and
            // nothing else refers to them.
            fds.extend(
                received
                    .into_iter()
                    .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
            );
        }
    }

    if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("control data truncated after {} descriptors", fds.len()),
        ));
    }

    Ok((msg.bytes, fds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::OFlag;
    use nix::unistd::pipe2;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_send_recv_pipe_ends() {
        let (parent, child) = UnixStream::pair().unwrap();
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();

        let sent = send_with_fds(child.as_raw_fd(), b"{}", &[read_end.as_raw_fd()]).unwrap();
        assert_eq!(sent, 2);
        drop(read_end);

        let mut buf = [0u8; 16];
        let (n, mut fds) = recv_with_fds(parent.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"{}");
        assert_eq!(fds.len(), 1);

        let mut writer = File::from(write_end);
        writer.write_all(b"through the socket").unwrap();
        drop(writer);

        let mut reader = File::from(fds.remove(0));
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "through the socket");
    }

    #[test]
    fn test_send_without_fds() {
        let (parent, child) = UnixStream::pair().unwrap();

        send_with_fds(child.as_raw_fd(), b"plain", &[]).unwrap();

        let mut buf = [0u8; 16];
        let (n, fds) = recv_with_fds(parent.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"plain");
        assert!(fds.is_empty());
    }
}
