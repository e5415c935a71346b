//! Network ports and `host:port` addresses.
//!
//! # Example
//!
//! ```rust
//! use serv_server::port::{split_host_port, Port};
//!
//! let port: Port = ":8080".parse().unwrap();
//! assert_eq!(port.get(), 8080);
//! assert_eq!(port.addr(), ":8080");
//!
//! let (host, port) = split_host_port("localhost:4040").unwrap();
//! assert_eq!(host, "localhost");
//! assert_eq!(port, Port::new(4040));
//! ```

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Why a port or address could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortErrorKind {
    /// The input has no (numeric) port.
    #[error("missing port")]
    MissingPort,

    /// The input looks like `host:port` where only a port is expected.
    #[error("invalid format")]
    InvalidFormat,

    /// The address is malformed in another way.
    #[error("{0}")]
    Address(&'static str),
}

/// Error returned when parsing a [`Port`] or splitting an address fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{input}`: {kind}")]
pub struct PortParseError {
    kind: PortErrorKind,
    input: String,
    #[source]
    cause: Option<ParseIntError>,
}

impl PortParseError {
    fn new(kind: PortErrorKind, input: &str) -> Self {
        Self {
            kind,
            input: input.to_string(),
            cause: None,
        }
    }

    /// The kind of failure.
    pub fn kind(&self) -> &PortErrorKind {
        &self.kind
    }

    /// The input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Reports whether the input was missing a port.
    pub fn is_missing_port(&self) -> bool {
        self.kind == PortErrorKind::MissingPort
    }

    /// Reports whether the input had an invalid format.
    pub fn is_invalid_format(&self) -> bool {
        self.kind == PortErrorKind::InvalidFormat
    }
}

/// A network port. Port 0 means "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Port(u16);

impl Port {
    /// Creates a port from its number.
    pub const fn new(port: u16) -> Self {
        Self(port)
    }

    /// Parses `s` into a port.
    ///
    /// `s` may start with a colon. The number may be written in base 10 or
    /// with a `0x`, `0o`, `0b` or leading `0` prefix.
    pub fn parse(s: &str) -> Result<Self, PortParseError> {
        if s.is_empty() {
            return Err(PortParseError::new(PortErrorKind::MissingPort, s));
        }

        let digits = match s.find(':') {
            Some(0) => &s[1..],
            Some(_) => return Err(PortParseError::new(PortErrorKind::InvalidFormat, s)),
            None => s,
        };

        parse_u16(digits).map(Self).map_err(|err| PortParseError {
            kind: PortErrorKind::MissingPort,
            input: digits.to_string(),
            cause: Some(err),
        })
    }

    /// The port number.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Reports whether the port is unset.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns the port as a listen address such as `:8080`, or an empty
    /// string for port 0.
    pub fn addr(self) -> String {
        if self.0 == 0 {
            String::new()
        } else {
            format!(":{}", self.0)
        }
    }

    /// Applies the port to `addr`.
    ///
    /// An empty address becomes `:port`, a bare host gets `:port` appended
    /// and an existing port is replaced while the host is kept.
    pub fn apply_to_addr(self, addr: &str) -> String {
        if addr.is_empty() {
            return self.addr();
        }
        if !addr.contains(':') {
            return format!("{addr}{}", self.addr());
        }

        let host = match split(addr) {
            Ok((host, _)) => host,
            Err(PortErrorKind::MissingPort) => addr,
            Err(_) => "",
        };
        if host.starts_with('[') || !host.contains(':') {
            format!("{host}{}", self.addr())
        } else {
            format!("[{host}]{}", self.addr())
        }
    }
}

impl From<u16> for Port {
    fn from(port: u16) -> Self {
        Self(port)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

impl fmt::Display for Port {
    /// Formats the port number; port 0 formats as an empty string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            Ok(())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for Port {
    type Err = PortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Port {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for Port {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PortVisitor;

        impl Visitor<'_> for PortVisitor {
            type Value = Port;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a port number or a string such as \":8080\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Port, E> {
                u16::try_from(v)
                    .map(Port)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Port, E> {
                u16::try_from(v)
                    .map(Port)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Port, E> {
                if v.is_empty() {
                    return Ok(Port::default());
                }
                Port::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(PortVisitor)
    }
}

/// Splits a network address of the form `host:port`, `host%zone:port`,
/// `[host]:port` or `[host%zone]:port` into host and [`Port`].
pub fn split_host_port(hostport: &str) -> Result<(String, Port), PortParseError> {
    let (host, port) = split(hostport).map_err(|kind| PortParseError::new(kind, hostport))?;
    let port = Port::parse(port)?;
    Ok((host.to_string(), port))
}

/// Combines host and port into `host:port`, or `[host]:port` when the host
/// contains a colon (IPv6 literals).
pub fn join_host_port(host: &str, port: Port) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

// Splits without parsing the port; the error kinds follow the usual
// `host:port` grammar.
fn split(hostport: &str) -> Result<(&str, &str), PortErrorKind> {
    const MISSING_BRACKET: PortErrorKind = PortErrorKind::Address("missing ']' in address");
    const TOO_MANY_COLONS: PortErrorKind = PortErrorKind::Address("too many colons in address");

    let i = hostport.rfind(':').ok_or(PortErrorKind::MissingPort)?;
    let host;
    let open;
    let close;

    if hostport.starts_with('[') {
        let end = hostport.find(']').ok_or(MISSING_BRACKET)?;
        if end + 1 == hostport.len() {
            return Err(PortErrorKind::MissingPort);
        }
        if end + 1 != i {
            return Err(if hostport.as_bytes()[end + 1] == b':' {
                TOO_MANY_COLONS
            } else {
                PortErrorKind::MissingPort
            });
        }
        host = &hostport[1..end];
        open = 1;
        close = end + 1;
    } else {
        host = &hostport[..i];
        if host.contains(':') {
            return Err(TOO_MANY_COLONS);
        }
        open = 0;
        close = 0;
    }

    if hostport[open..].contains('[') {
        return Err(PortErrorKind::Address("unexpected '[' in address"));
    }
    if hostport[close..].contains(']') {
        return Err(PortErrorKind::Address("unexpected ']' in address"));
    }

    Ok((host, &hostport[i + 1..]))
}

fn parse_u16(s: &str) -> Result<u16, ParseIntError> {
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(oct) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (oct, 8)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (bin, 2)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };

    // from_str_radix accepts a leading '+', a plain port never has one
    match digits.strip_prefix('+') {
        Some(_) => u16::from_str_radix("", radix),
        None => u16::from_str_radix(digits, radix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_port() {
        assert!(Port::parse("").unwrap_err().is_missing_port());
        assert_eq!(Port::parse("443").unwrap(), Port::new(443));
        assert_eq!(Port::parse("8080").unwrap(), Port::new(8080));
        assert_eq!(Port::parse(":8080").unwrap(), Port::new(8080));
        assert!(Port::parse("localhost:123").unwrap_err().is_invalid_format());
    }

    #[test]
    fn test_parse_port_non_numeric() {
        let err = Port::parse("http").unwrap_err();
        assert!(err.is_missing_port());
        assert_eq!(err.input(), "http");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_parse_port_out_of_range() {
        assert!(Port::parse("65536").unwrap_err().is_missing_port());
        assert!(Port::parse("-1").unwrap_err().is_missing_port());
        assert!(Port::parse("+80").unwrap_err().is_missing_port());
    }

    #[test]
    fn test_parse_port_prefixes() {
        assert_eq!(Port::parse("0x1F90").unwrap(), Port::new(8080));
        assert_eq!(Port::parse("0o17620").unwrap(), Port::new(8080));
        assert_eq!(Port::parse("017620").unwrap(), Port::new(8080));
        assert_eq!(Port::parse("0").unwrap(), Port::new(0));
    }

    #[test]
    fn test_error_display() {
        let err = Port::parse("localhost:123").unwrap_err();
        assert_eq!(err.to_string(), "`localhost:123`: invalid format");
    }

    #[test]
    fn test_display_and_addr() {
        assert_eq!(Port::new(0).to_string(), "");
        assert_eq!(Port::new(0).addr(), "");
        assert_eq!(Port::new(80).to_string(), "80");
        assert_eq!(Port::new(80).addr(), ":80");
    }

    #[test]
    fn test_split_host_port() {
        let (host, port) = split_host_port("localhost:4040").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, Port::new(4040));

        let (host, port) = split_host_port("[::1%lo0]:456").unwrap();
        assert_eq!(host, "::1%lo0");
        assert_eq!(port, Port::new(456));

        let (host, port) = split_host_port(":80").unwrap();
        assert_eq!(host, "");
        assert_eq!(port, Port::new(80));
    }

    #[test]
    fn test_split_host_port_errors() {
        assert!(split_host_port("localhost").unwrap_err().is_missing_port());
        assert!(split_host_port("[::1]").unwrap_err().is_missing_port());
        assert!(split_host_port("localhost:").unwrap_err().is_missing_port());

        let err = split_host_port("::1:80").unwrap_err();
        assert_eq!(
            err.kind(),
            &PortErrorKind::Address("too many colons in address")
        );
        assert!(split_host_port("[::1:80").is_err());
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("localhost", Port::new(80)), "localhost:80");
        assert_eq!(join_host_port("::1", Port::new(80)), "[::1]:80");
    }

    #[test]
    fn test_apply_to_addr() {
        let port = Port::new(8080);
        assert_eq!(port.apply_to_addr(""), ":8080");
        assert_eq!(port.apply_to_addr("localhost"), "localhost:8080");
        assert_eq!(port.apply_to_addr("localhost:1234"), "localhost:8080");
        assert_eq!(port.apply_to_addr("127.0.0.1:80"), "127.0.0.1:8080");
        assert_eq!(port.apply_to_addr("[::1]:80"), "[::1]:8080");
        assert_eq!(port.apply_to_addr("[fe80::1%lo0]:80"), "[fe80::1%lo0]:8080");
        assert_eq!(port.apply_to_addr("[::1]"), "[::1]:8080");
        assert_eq!(port.apply_to_addr(":80"), ":8080");
    }

    #[test]
    fn test_serde() {
        #[derive(Deserialize, Serialize)]
        struct Wrapper {
            port: Port,
        }

        let w: Wrapper = serde_json::from_str(r#"{"port": 8080}"#).unwrap();
        assert_eq!(w.port, Port::new(8080));

        let w: Wrapper = serde_json::from_str(r#"{"port": ":9090"}"#).unwrap();
        assert_eq!(w.port, Port::new(9090));

        assert!(serde_json::from_str::<Wrapper>(r#"{"port": 70000}"#).is_err());
        assert_eq!(
            serde_json::to_string(&Wrapper { port: Port::new(1) }).unwrap(),
            r#"{"port":1}"#
        );
    }

    proptest! {
        #[test]
        fn prop_parse_roundtrip(n in 1u16..=u16::MAX) {
            prop_assert_eq!(Port::parse(&n.to_string()).unwrap(), Port::new(n));
            prop_assert_eq!(Port::parse(&Port::new(n).addr()).unwrap(), Port::new(n));
        }

        #[test]
        fn prop_host_prefix_is_invalid_format(host in "[a-z]{1,12}", n in 1u16..=u16::MAX) {
            let input = format!("{host}:{n}");
            prop_assert!(Port::parse(&input).unwrap_err().is_invalid_format());
        }
    }
}
