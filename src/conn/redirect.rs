//! Redirect target parsing.

use log::warn;

/// Splits a `host[:port]` redirect target. A missing or unparseable port
/// falls back to `default_port`; servers have been seen sending garbage
/// there and the host part is still usable.
pub fn parse_host_port(target: &str, default_port: u16) -> (String, u16) {
    match target.rsplit_once(':') {
        None => (target.to_owned(), default_port),
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) if port != 0 => (host.to_owned(), port),
            _ => {
                warn!("[conn] ignoring invalid port {port:?} in redirect target {target:?}");
                (host.to_owned(), default_port)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_and_port() {
        assert_eq!(
            parse_host_port("chat.example.net:9898", 5190),
            ("chat.example.net".to_owned(), 9898)
        );
    }

    #[test]
    fn bare_host_uses_default() {
        assert_eq!(
            parse_host_port("chat.example.net", 5190),
            ("chat.example.net".to_owned(), 5190)
        );
    }

    #[test]
    fn invalid_port_uses_default() {
        assert_eq!(
            parse_host_port("chat.example.net:yes", 5190),
            ("chat.example.net".to_owned(), 5190)
        );
        assert_eq!(
            parse_host_port("chat.example.net:0", 5190),
            ("chat.example.net".to_owned(), 5190)
        );
    }
}
