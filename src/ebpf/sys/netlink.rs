//! XDP attach, detach and query over rtnetlink

use crate::config::XdpFlags;
use crate::ebpf::XdpLink;
use netlink_packet_core::{NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_REQUEST};
use netlink_packet_route::link::{LinkAttribute, LinkMessage, LinkXdp, XdpAttached};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use tracing::{debug, trace};

const RECV_BUF_LEN: usize = 32 * 1024;

/// Contents of the `IFLA_XDP` attribute of a link
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct XdpLinkInfo {
    /// Programs are bound in more than one mode
    pub multi: bool,
    pub prog_id: u32,
    pub drv_prog_id: u32,
    pub skb_prog_id: u32,
    pub hw_prog_id: u32,
}

impl XdpLinkInfo {
    /// Program id for the mode selected by `flags`
    pub fn prog_id_for(&self, flags: XdpFlags) -> u32 {
        if flags.contains(XdpFlags::DRV_MODE) {
            self.drv_prog_id
        } else if flags.contains(XdpFlags::SKB_MODE) {
            self.skb_prog_id
        } else if flags.contains(XdpFlags::HW_MODE) {
            self.hw_prog_id
        } else if !self.multi {
            self.prog_id
        } else {
            0
        }
    }

    fn from_attributes(attrs: &[LinkXdp]) -> Self {
        let mut info = Self::default();
        for attr in attrs {
            match attr {
                LinkXdp::Attached(attached) => {
                    info.multi = matches!(attached, XdpAttached::Multiple)
                }
                LinkXdp::ProgId(id) => info.prog_id = *id,
                LinkXdp::DrvProgId(id) => info.drv_prog_id = *id,
                LinkXdp::SkbProgId(id) => info.skb_prog_id = *id,
                LinkXdp::HwProgId(id) => info.hw_prog_id = *id,
                _ => {}
            }
        }
        info
    }
}

fn request(
    seq: u32,
    flags: u16,
    message: RouteNetlinkMessage,
) -> NetlinkMessage<RouteNetlinkMessage> {
    let mut header = NetlinkHeader::default();
    header.flags = flags;
    header.sequence_number = seq;

    let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(message));
    packet.finalize();
    packet
}

/// `RTM_SETLINK` carrying `IFLA_XDP`; `fd` -1 unbinds
fn setlink_request(seq: u32, ifindex: u32, fd: i32, flags: XdpFlags) -> NetlinkMessage<RouteNetlinkMessage> {
    let mut xdp = vec![LinkXdp::Fd(fd)];
    if flags.bits() != 0 {
        xdp.push(LinkXdp::Flags(flags.bits()));
    }

    let mut link = LinkMessage::default();
    link.header.index = ifindex;
    link.attributes.push(LinkAttribute::Xdp(xdp));

    request(
        seq,
        NLM_F_REQUEST | NLM_F_ACK,
        RouteNetlinkMessage::SetLink(link),
    )
}

fn getlink_request(seq: u32, ifindex: u32) -> NetlinkMessage<RouteNetlinkMessage> {
    let mut link = LinkMessage::default();
    link.header.index = ifindex;
    request(seq, NLM_F_REQUEST, RouteNetlinkMessage::GetLink(link))
}

fn serialize(packet: &NetlinkMessage<RouteNetlinkMessage>) -> Vec<u8> {
    let mut buf = vec![0u8; packet.buffer_len()];
    packet.serialize(&mut buf);
    buf
}

/// Split a receive buffer into messages
fn messages(buf: &[u8]) -> io::Result<Vec<NetlinkMessage<RouteNetlinkMessage>>> {
    let mut out = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[offset..])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let len = msg.header.length as usize;
        if len == 0 {
            break;
        }
        offset += (len + 3) & !3;
        out.push(msg);
    }

    Ok(out)
}

fn errno(code: Option<std::num::NonZeroI32>) -> io::Result<()> {
    match code {
        None => Ok(()),
        Some(code) => Err(io::Error::from_raw_os_error(-code.get())),
    }
}

/// Outcome of a `RTM_SETLINK` request, `None` if the ack is not in `buf`
fn parse_ack(buf: &[u8], seq: u32) -> io::Result<Option<()>> {
    for msg in messages(buf)? {
        if msg.header.sequence_number != seq {
            continue;
        }
        if let NetlinkPayload::Error(err) = msg.payload {
            return errno(err.code).map(Some);
        }
    }
    Ok(None)
}

/// XDP state from a `RTM_GETLINK` reply, `None` if the reply is not in `buf`
fn parse_link_info(buf: &[u8], seq: u32) -> io::Result<Option<XdpLinkInfo>> {
    for msg in messages(buf)? {
        if msg.header.sequence_number != seq {
            continue;
        }
        match msg.payload {
            NetlinkPayload::Error(err) => errno(err.code)?,
            NetlinkPayload::Done(_) => return Ok(Some(XdpLinkInfo::default())),
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) => {
                let info = link
                    .attributes
                    .iter()
                    .find_map(|attr| match attr {
                        LinkAttribute::Xdp(xdp) => Some(XdpLinkInfo::from_attributes(xdp)),
                        _ => None,
                    })
                    .unwrap_or_default();
                return Ok(Some(info));
            }
            _ => {}
        }
    }
    Ok(None)
}

/// `NETLINK_ROUTE` socket used for XDP link operations
pub struct NetlinkXdp {
    socket: Socket,
    seq: u32,
    buffer: Vec<u8>,
}

impl NetlinkXdp {
    pub fn new() -> io::Result<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)?;
        socket.bind_auto()?;
        socket.connect(&SocketAddr::new(0, 0))?;

        Ok(Self {
            socket,
            seq: 0,
            buffer: Vec::with_capacity(RECV_BUF_LEN),
        })
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn send(&self, packet: &NetlinkMessage<RouteNetlinkMessage>) -> io::Result<()> {
        self.socket.send(&serialize(packet), 0)?;
        Ok(())
    }

    /// Receive until `parse` recognizes the reply
    fn recv_reply<T>(
        &mut self,
        mut parse: impl FnMut(&[u8]) -> io::Result<Option<T>>,
    ) -> io::Result<T> {
        loop {
            self.buffer.clear();
            let n = match self.socket.recv(&mut self.buffer, 0) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "netlink socket closed",
                ));
            }
            trace!("netlink reply of {} bytes", n);
            if let Some(reply) = parse(&self.buffer[..n])? {
                return Ok(reply);
            }
        }
    }

    /// Full XDP state of `ifindex`
    pub fn link_info(&mut self, ifindex: u32) -> io::Result<XdpLinkInfo> {
        let seq = self.next_seq();
        self.send(&getlink_request(seq, ifindex))?;
        self.recv_reply(|buf| parse_link_info(buf, seq))
    }
}

impl XdpLink for NetlinkXdp {
    fn set_xdp_fd(
        &mut self,
        ifindex: u32,
        prog: Option<BorrowedFd<'_>>,
        flags: XdpFlags,
    ) -> io::Result<()> {
        let seq = self.next_seq();
        let fd = prog.map_or(-1, |fd| fd.as_raw_fd());
        debug!(
            "RTM_SETLINK ifindex={} fd={} flags={:?}",
            ifindex, fd, flags
        );

        self.send(&setlink_request(seq, ifindex, fd, flags))?;
        self.recv_reply(|buf| parse_ack(buf, seq))
    }

    fn query_xdp_id(&mut self, ifindex: u32, flags: XdpFlags) -> io::Result<u32> {
        let info = self.link_info(ifindex)?;
        debug!("XDP state of ifindex {}: {:?}", ifindex, info);
        Ok(info.prog_id_for(flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netlink_packet_core::{DoneMessage, ErrorMessage};
    use std::num::NonZeroI32;

    fn error_reply(seq: u32, errno: i32) -> Vec<u8> {
        let mut err = ErrorMessage::default();
        err.code = NonZeroI32::new(-errno);
        // echoed request header
        err.header = vec![0u8; 16];

        let mut header = NetlinkHeader::default();
        header.sequence_number = seq;
        let mut packet =
            NetlinkMessage::<RouteNetlinkMessage>::new(header, NetlinkPayload::Error(err));
        packet.finalize();
        serialize(&packet)
    }

    fn newlink_reply(seq: u32, xdp: Vec<LinkXdp>) -> Vec<u8> {
        let mut link = LinkMessage::default();
        link.header.index = 3;
        link.attributes.push(LinkAttribute::IfName("eth0".to_string()));
        link.attributes.push(LinkAttribute::Xdp(xdp));

        let mut header = NetlinkHeader::default();
        header.sequence_number = seq;
        let mut packet = NetlinkMessage::new(
            header,
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)),
        );
        packet.finalize();
        serialize(&packet)
    }

    #[test]
    fn test_setlink_request() {
        let buf = serialize(&setlink_request(7, 3, -1, XdpFlags::SKB_MODE));
        let msgs = messages(&buf).unwrap();
        assert_eq!(msgs.len(), 1);

        let msg = &msgs[0];
        assert_eq!(msg.header.sequence_number, 7);
        assert!(msg.header.flags.contains(NetlinkFlags::ACK));

        let NetlinkPayload::InnerMessage(RouteNetlinkMessage::SetLink(link)) = &msg.payload
        else {
            panic!("unexpected payload: {:?}", msg.payload);
        };
        assert_eq!(link.header.index, 3);
        let xdp = link
            .attributes
            .iter()
            .find_map(|attr| match attr {
                LinkAttribute::Xdp(xdp) => Some(xdp.clone()),
                _ => None,
            })
            .expect("IFLA_XDP");
        assert_eq!(xdp, vec![LinkXdp::Fd(-1), LinkXdp::Flags(2)]);
    }

    #[test]
    fn test_setlink_without_flags() {
        let buf = serialize(&setlink_request(1, 3, 9, XdpFlags::empty()));
        let msgs = messages(&buf).unwrap();
        let NetlinkPayload::InnerMessage(RouteNetlinkMessage::SetLink(link)) = &msgs[0].payload
        else {
            panic!("unexpected payload");
        };
        assert_eq!(
            link.attributes,
            vec![LinkAttribute::Xdp(vec![LinkXdp::Fd(9)])]
        );
    }

    #[test]
    fn test_parse_ack() {
        assert_eq!(parse_ack(&error_reply(4, 0), 4).unwrap(), Some(()));

        let err = parse_ack(&error_reply(4, libc::EEXIST), 4).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));

        // reply to an older request
        assert_eq!(parse_ack(&error_reply(3, libc::EBUSY), 4).unwrap(), None);
    }

    #[test]
    fn test_parse_link_info_single_mode() {
        let buf = newlink_reply(
            9,
            vec![
                LinkXdp::Attached(XdpAttached::Driver),
                LinkXdp::DrvProgId(42),
                LinkXdp::ProgId(42),
            ],
        );
        let info = parse_link_info(&buf, 9).unwrap().expect("reply");

        assert_eq!(info.prog_id_for(XdpFlags::DRV_MODE), 42);
        assert_eq!(info.prog_id_for(XdpFlags::SKB_MODE), 0);
        assert_eq!(info.prog_id_for(XdpFlags::empty()), 42);
        assert_eq!(
            info.prog_id_for(XdpFlags::UPDATE_IF_NOEXIST | XdpFlags::DRV_MODE),
            42
        );
    }

    #[test]
    fn test_parse_link_info_multi_mode() {
        let buf = newlink_reply(
            2,
            vec![
                LinkXdp::Attached(XdpAttached::Multiple),
                LinkXdp::DrvProgId(10),
                LinkXdp::SkbProgId(11),
            ],
        );
        let info = parse_link_info(&buf, 2).unwrap().expect("reply");

        assert!(info.multi);
        assert_eq!(info.prog_id_for(XdpFlags::SKB_MODE), 11);
        assert_eq!(info.prog_id_for(XdpFlags::DRV_MODE), 10);
        assert_eq!(info.prog_id_for(XdpFlags::empty()), 0);
    }

    #[test]
    fn test_parse_link_info_error() {
        let err = parse_link_info(&error_reply(5, libc::ENODEV), 5).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENODEV));
    }

    #[test]
    fn test_parse_link_info_done_means_nothing_bound() {
        let mut header = NetlinkHeader::default();
        header.sequence_number = 6;
        let mut packet = NetlinkMessage::<RouteNetlinkMessage>::new(
            header,
            NetlinkPayload::Done(DoneMessage::default()),
        );
        packet.finalize();

        let info = parse_link_info(&serialize(&packet), 6).unwrap().expect("reply");
        assert_eq!(info, XdpLinkInfo::default());
    }

    #[test]
    fn test_truncated_reply() {
        let mut buf = newlink_reply(1, vec![LinkXdp::ProgId(1)]);
        buf.truncate(20);
        assert!(parse_link_info(&buf, 1).is_err());
    }
}
