//! Minimal SOCKS4 / SOCKS5 client for tunnelling the remote connection.
//!
//! Only the `connect` command is supported, and SOCKS5 only without
//! authentication.

use crate::backup::client_config::{ProxyCommand, ProxyConfig, SocksVersion};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

static PROXY_TIMEOUT: Duration = Duration::from_secs(30);

const SOCKS5_NO_AUTH: u8 = 0x00;
const SOCKS5_CMD_CONNECT: u8 = 0x01;
const SOCKS5_ATYP_IPV4: u8 = 0x01;
const SOCKS5_ATYP_DOMAIN: u8 = 0x03;
const SOCKS5_ATYP_IPV6: u8 = 0x04;
const SOCKS4_CMD_CONNECT: u8 = 0x01;
const SOCKS4_GRANTED: u8 = 0x5A;

/// Connects to the proxy and asks it to open a stream to `host:port`.
///
/// The returned socket is positioned right after the handshake and can be
/// used as the transport of the remote session.
pub fn open_tunnel(proxy: &ProxyConfig, host: &str, port: u16) -> Result<TcpStream> {
    if proxy.command != ProxyCommand::Connect {
        return Err(Error::Proxy(format!(
            "command {:?} is not supported for tunnelling, use \"connect\"",
            proxy.command.to_string()
        )));
    }

    let proxy_addr = resolve(&proxy.host, proxy.port)?;
    let mut stream = TcpStream::connect_timeout(&proxy_addr, PROXY_TIMEOUT)?;
    stream.set_read_timeout(Some(PROXY_TIMEOUT))?;
    stream.set_write_timeout(Some(PROXY_TIMEOUT))?;

    match proxy.version {
        SocksVersion::V4 => socks4_connect(&mut stream, host, port)?,
        SocksVersion::V5 => socks5_connect(&mut stream, host, port)?,
    }

    stream.set_read_timeout(None)?;
    stream.set_write_timeout(None)?;
    Ok(stream)
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Proxy(format!("cannot resolve {host}:{port}")))
}

fn socks5_connect<S: Read + Write>(stream: &mut S, host: &str, port: u16) -> Result<()> {
    stream.write_all(&[0x05, 0x01, SOCKS5_NO_AUTH])?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice)?;
    if choice != [0x05, SOCKS5_NO_AUTH] {
        return Err(Error::Proxy(format!(
            "proxy refused unauthenticated SOCKSv5 (reply {:?})",
            choice
        )));
    }

    let mut request = vec![0x05, SOCKS5_CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(SOCKS5_ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(SOCKS5_ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len())
                .map_err(|_| Error::Proxy(format!("host name too long: {host}")))?;
            request.push(SOCKS5_ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request)?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply)?;
    if reply[1] != 0x00 {
        return Err(Error::Proxy(format!(
            "SOCKSv5 connect to {host}:{port} failed with code {}",
            reply[1]
        )));
    }

    let addr_len = match reply[3] {
        SOCKS5_ATYP_IPV4 => 4,
        SOCKS5_ATYP_IPV6 => 16,
        SOCKS5_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len)?;
            len[0] as usize
        }
        other => {
            return Err(Error::Proxy(format!(
                "SOCKSv5 reply with unknown address type {other}"
            )))
        }
    };
    // bound address and port are not needed
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound)?;
    Ok(())
}

fn socks4_connect<S: Read + Write>(stream: &mut S, host: &str, port: u16) -> Result<()> {
    let ip = (host, port)
        .to_socket_addrs()?
        .find_map(|a| match a.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| Error::Proxy(format!("SOCKSv4 needs an IPv4 address for {host}")))?;

    let mut request = vec![0x04, SOCKS4_CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&ip.octets());
    // empty user id
    request.push(0x00);
    stream.write_all(&request)?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply)?;
    if reply[1] != SOCKS4_GRANTED {
        return Err(Error::Proxy(format!(
            "SOCKSv4 connect to {host}:{port} rejected with code {:#x}",
            reply[1]
        )));
    }
    Ok(())
}
