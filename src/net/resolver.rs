//! Address resolution through the system resolver.
//!
//! Turns an [`Endpoint`] into the ordered list of stream socket addresses
//! returned by `getaddrinfo`. The list keeps the resolver's ordering, except
//! that a null-host connect lookup puts the family a null-host bind would
//! use first. The callers in this crate use the first entry.

use crate::error::{NetError, Result};
use serde::Deserialize;
use std::ffi::{CStr, CString};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::{io, mem, ptr};
use tracing::debug;

/// Address family requested from the resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Either IPv4 or IPv6, whichever the resolver returns.
    #[default]
    Unspecified,
    Ipv4,
    Ipv6,
}

impl Family {
    fn as_raw(self) -> libc::c_int {
        match self {
            Family::Unspecified => libc::AF_UNSPEC,
            Family::Ipv4 => libc::AF_INET,
            Family::Ipv6 => libc::AF_INET6,
        }
    }

    fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Family::Ipv4,
            SocketAddr::V6(_) => Family::Ipv6,
        }
    }
}

/// What the resolved addresses will be used for.
///
/// With a null host, `Bind` yields the wildcard address and `Connect`
/// yields loopback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Bind,
    Connect,
}

/// Logical network destination prior to resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub family: Family,
    /// `None` means the local/any host.
    pub host: Option<String>,
    /// Numeric port or service name.
    pub port: String,
}

impl Endpoint {
    pub fn new(host: Option<String>, port: impl Into<String>, family: Family) -> Self {
        Self {
            family,
            host,
            port: port.into(),
        }
    }

    /// Null-host endpoint on `port`.
    pub fn local(port: impl Into<String>) -> Self {
        Self::new(None, port, Family::Unspecified)
    }

    /// Endpoint a client should use to reach a socket listening on `addr`.
    ///
    /// A wildcard bind address is replaced by the loopback address of the
    /// same family.
    pub fn reaching(addr: SocketAddr) -> Self {
        let addr = reachable(addr);
        Self::new(
            Some(addr.ip().to_string()),
            addr.port().to_string(),
            Family::of(&addr),
        )
    }
}

/// `addr` with a wildcard IP replaced by loopback of the same family.
pub fn reachable(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) if host.contains(':') => write!(f, "[{}]:{}", host, self.port),
            Some(host) => write!(f, "{}:{}", host, self.port),
            None => write!(f, "*:{}", self.port),
        }
    }
}

/// A concrete address usable directly for bind or connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub addr: SocketAddr,
    pub protocol: libc::c_int,
}

impl ResolvedAddress {
    pub fn domain(&self) -> socket2::Domain {
        socket2::Domain::for_address(self.addr)
    }

    pub fn protocol(&self) -> Option<socket2::Protocol> {
        (self.protocol != 0).then(|| socket2::Protocol::from(self.protocol))
    }
}

/// Resolve `endpoint` into an ordered, non-empty list of stream addresses.
pub fn resolve(endpoint: &Endpoint, purpose: Purpose) -> Result<Vec<ResolvedAddress>> {
    let host = endpoint
        .host
        .as_deref()
        .map(CString::new)
        .transpose()
        .map_err(|_| invalid_input(endpoint, "host contains a NUL byte"))?;
    let port = CString::new(endpoint.port.as_str())
        .map_err(|_| invalid_input(endpoint, "port contains a NUL byte"))?;

    // SAFETY: addrinfo is a plain C struct; all-zero is the documented
    // "no hints" value that the fields below refine.
    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = endpoint.family.as_raw();
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_protocol = libc::IPPROTO_TCP;
    if purpose == Purpose::Bind {
        hints.ai_flags = libc::AI_PASSIVE;
    }

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    // SAFETY: host and port are valid NUL-terminated strings that outlive
    // the call; res is only read on success.
    let status = unsafe {
        libc::getaddrinfo(
            host.as_ref().map_or(ptr::null(), |h| h.as_ptr()),
            port.as_ptr(),
            &hints,
            &mut res,
        )
    };
    if status != 0 {
        return Err(lookup_error(endpoint, status));
    }

    let list = AddrInfoList(res);
    let mut addrs: Vec<ResolvedAddress> = list
        .iter()
        .filter(|info| info.ai_socktype == libc::SOCK_STREAM)
        .filter_map(|info| {
            socket_addr(info).map(|addr| ResolvedAddress {
                addr,
                protocol: info.ai_protocol,
            })
        })
        .collect();
    drop(list);

    if purpose == Purpose::Connect
        && endpoint.host.is_none()
        && endpoint.family == Family::Unspecified
    {
        align_with_bind(endpoint, &mut addrs);
    }

    for (idx, resolved) in addrs.iter().enumerate() {
        debug!(
            endpoint = %endpoint,
            idx,
            family = ?Family::of(&resolved.addr),
            ip = %resolved.addr.ip(),
            port = resolved.addr.port(),
            "Resolved address"
        );
    }

    if addrs.is_empty() {
        return Err(NetError::NoAddress {
            host: host_label(endpoint),
            port: endpoint.port.clone(),
        });
    }
    Ok(addrs)
}

/// Move addresses of the family a null-host server binds first to the front.
///
/// The passive lookup may prefer a different family than the active one
/// (`0.0.0.0` vs `::1`); both ends use the first entry, so they must agree.
fn align_with_bind(endpoint: &Endpoint, addrs: &mut [ResolvedAddress]) {
    let bind_family = match resolve(endpoint, Purpose::Bind) {
        Ok(bound) => Family::of(&bound[0].addr),
        Err(_) => return,
    };
    addrs.sort_by_key(|a| Family::of(&a.addr) != bind_family);
}

/// Owns a `getaddrinfo` result list and frees it on drop.
struct AddrInfoList(*mut libc::addrinfo);

impl AddrInfoList {
    fn iter(&self) -> impl Iterator<Item = &libc::addrinfo> + '_ {
        let mut cur = self.0;
        std::iter::from_fn(move || {
            if cur.is_null() {
                return None;
            }
            // SAFETY: cur is a node of the list owned by self, which is
            // alive for the iterator's lifetime.
            let info = unsafe { &*cur };
            cur = info.ai_next;
            Some(info)
        })
    }
}

impl Drop for AddrInfoList {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: the pointer came from a successful getaddrinfo and is
            // freed exactly once.
            unsafe { libc::freeaddrinfo(self.0) };
        }
    }
}

fn socket_addr(info: &libc::addrinfo) -> Option<SocketAddr> {
    if info.ai_addr.is_null() {
        return None;
    }
    match info.ai_family {
        libc::AF_INET if info.ai_addrlen as usize >= mem::size_of::<libc::sockaddr_in>() => {
            // SAFETY: family and length identify a sockaddr_in.
            let sin = unsafe { &*(info.ai_addr as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 if info.ai_addrlen as usize >= mem::size_of::<libc::sockaddr_in6>() => {
            // SAFETY: family and length identify a sockaddr_in6.
            let sin6 = unsafe { &*(info.ai_addr as *const libc::sockaddr_in6) };
            Some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                u32::from_be(sin6.sin6_flowinfo),
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

fn lookup_error(endpoint: &Endpoint, status: libc::c_int) -> NetError {
    let message = if status == libc::EAI_SYSTEM {
        io::Error::last_os_error().to_string()
    } else {
        // SAFETY: gai_strerror returns a pointer to a static string.
        unsafe { CStr::from_ptr(libc::gai_strerror(status)) }
            .to_string_lossy()
            .into_owned()
    };
    NetError::Resolution {
        host: host_label(endpoint),
        port: endpoint.port.clone(),
        code: status,
        message,
    }
}

fn invalid_input(endpoint: &Endpoint, message: &str) -> NetError {
    NetError::Resolution {
        host: host_label(endpoint),
        port: endpoint.port.clone(),
        code: libc::EAI_NONAME,
        message: message.to_string(),
    }
}

fn host_label(endpoint: &Endpoint) -> String {
    endpoint.host.clone().unwrap_or_else(|| "*".to_string())
}
